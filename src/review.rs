//! Reviewer-side state for one analysis: proposals, selections, and the
//! accumulated validated items across regeneration rounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deserializers::{de_option_string_or_list, split_list};
use crate::error::{GatewayError, Result};
use crate::polling::UseCaseProposals;
use crate::schemas::{Need, UseCase, UseCaseCategory, needs_fingerprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Upload,
    Needs,
    UseCases,
    Results,
}

/// Partial edit of a use case; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UseCasePatch {
    #[serde(default)]
    pub selected: Option<bool>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Comma-separated string or list
    #[serde(
        default,
        alias = "ai_technologies",
        deserialize_with = "de_option_string_or_list"
    )]
    pub technologies: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NeedPatch {
    #[serde(default)]
    pub selected: Option<bool>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReviewCounts {
    pub proposed_needs: usize,
    pub selected_needs: usize,
    pub validated_needs: usize,
    pub proposed_quick_wins: usize,
    pub selected_quick_wins: usize,
    pub proposed_structuration_ia: usize,
    pub selected_structuration_ia: usize,
    pub validated_use_cases: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewSession {
    pub id: Uuid,
    pub thread_id: Option<String>,
    pub company_name: String,
    pub workshop_files: Vec<String>,
    pub transcript_files: Vec<String>,
    pub phase: Phase,
    pub needs: Vec<Need>,
    pub validated_needs: Vec<Need>,
    pub quick_wins: Vec<UseCase>,
    pub structuration_ia: Vec<UseCase>,
    pub validated_quick_wins: Vec<UseCase>,
    pub validated_structuration_ia: Vec<UseCase>,
    pub last_error: Option<String>,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Fingerprints of the proposal sets as the engine last delivered them,
    /// before any local edit.
    #[serde(skip)]
    pub needs_source: Vec<String>,
    #[serde(skip)]
    pub use_cases_source: Vec<String>,
}

fn title_key(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Selected first; relative order otherwise preserved (`sort_by_key` is stable).
fn selected_first<T: Clone>(items: &[T], selected: impl Fn(&T) -> bool) -> Vec<T> {
    let mut out = items.to_vec();
    out.sort_by_key(|item| !selected(item));
    out
}

impl ReviewSession {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            thread_id: None,
            company_name: String::new(),
            workshop_files: Vec::new(),
            transcript_files: Vec::new(),
            phase: Phase::Upload,
            needs: Vec::new(),
            validated_needs: Vec::new(),
            quick_wins: Vec::new(),
            structuration_ia: Vec::new(),
            validated_quick_wins: Vec::new(),
            validated_structuration_ia: Vec::new(),
            last_error: None,
            status_message: None,
            created_at: now,
            updated_at: now,
            needs_source: Vec::new(),
            use_cases_source: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn reset(&mut self) {
        let id = self.id;
        let created_at = self.created_at;
        *self = Self::new();
        self.id = id;
        self.created_at = created_at;
    }

    // ---- needs -------------------------------------------------------------

    fn need_mut(&mut self, id: &str) -> Result<&mut Need> {
        self.needs
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| GatewayError::not_found(format!("need '{}'", id)))
    }

    pub fn toggle_need(&mut self, id: &str) -> Result<bool> {
        let need = self.need_mut(id)?;
        need.selected = !need.selected;
        let selected = need.selected;
        self.touch();
        Ok(selected)
    }

    pub fn set_need_selected(&mut self, id: &str, selected: bool) -> Result<()> {
        self.need_mut(id)?.selected = selected;
        self.touch();
        Ok(())
    }

    pub fn edit_need_title(&mut self, id: &str, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(GatewayError::validation("need title cannot be empty"));
        }
        let need = self.need_mut(id)?;
        if need.title != title {
            need.title = title.to_string();
            need.edited = true;
        }
        self.touch();
        Ok(())
    }

    pub fn apply_need_patch(&mut self, id: &str, patch: &NeedPatch) -> Result<()> {
        if let Some(title) = &patch.title {
            self.edit_need_title(id, title)?;
        }
        if let Some(selected) = patch.selected {
            self.set_need_selected(id, selected)?;
        }
        Ok(())
    }

    pub fn sorted_needs(&self) -> Vec<Need> {
        selected_first(&self.needs, |n| n.selected)
    }

    pub fn selected_needs(&self) -> Vec<Need> {
        self.needs.iter().filter(|n| n.selected).cloned().collect()
    }

    pub fn rejected_needs(&self) -> Vec<Need> {
        self.needs.iter().filter(|n| !n.selected).cloned().collect()
    }

    /// Replace the proposals with a set delivered by the engine.
    pub fn set_needs(&mut self, needs: Vec<Need>) {
        self.needs_source = needs_fingerprint(&needs);
        self.needs = needs;
        self.touch();
    }

    /// Append validated needs, skipping titles already accumulated.
    /// Returns how many were added.
    pub fn accumulate_validated_needs(&mut self, batch: Vec<Need>) -> usize {
        let before = self.validated_needs.len();
        for need in batch {
            let key = title_key(&need.title);
            if !self
                .validated_needs
                .iter()
                .any(|n| title_key(&n.title) == key)
            {
                self.validated_needs.push(need);
            }
        }
        self.touch();
        self.validated_needs.len() - before
    }

    pub fn unselect_validated_need(&mut self, id: &str) -> Result<Need> {
        let pos = self
            .validated_needs
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| GatewayError::not_found(format!("validated need '{}'", id)))?;
        self.touch();
        Ok(self.validated_needs.remove(pos))
    }

    // ---- use cases ---------------------------------------------------------

    pub fn use_cases(&self, category: UseCaseCategory) -> &[UseCase] {
        match category {
            UseCaseCategory::QuickWin => &self.quick_wins,
            UseCaseCategory::StructurationIa => &self.structuration_ia,
        }
    }

    fn use_cases_mut(&mut self, category: UseCaseCategory) -> &mut Vec<UseCase> {
        match category {
            UseCaseCategory::QuickWin => &mut self.quick_wins,
            UseCaseCategory::StructurationIa => &mut self.structuration_ia,
        }
    }

    fn use_case_mut(&mut self, id: &str, category: UseCaseCategory) -> Result<&mut UseCase> {
        self.use_cases_mut(category)
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| GatewayError::not_found(format!("{} use case '{}'", category, id)))
    }

    pub fn set_use_case_selected(
        &mut self,
        id: &str,
        category: UseCaseCategory,
        selected: bool,
    ) -> Result<()> {
        self.use_case_mut(id, category)?.selected = selected;
        self.touch();
        Ok(())
    }

    pub fn edit_use_case(
        &mut self,
        id: &str,
        category: UseCaseCategory,
        patch: &UseCasePatch,
    ) -> Result<()> {
        if let Some(title) = &patch.title
            && title.trim().is_empty()
        {
            return Err(GatewayError::validation("use case title cannot be empty"));
        }
        let uc = self.use_case_mut(id, category)?;
        if let Some(selected) = patch.selected {
            uc.selected = selected;
        }
        if let Some(title) = &patch.title {
            uc.title = title.trim().to_string();
        }
        if let Some(description) = &patch.description {
            uc.description = description.clone();
        }
        if let Some(technologies) = &patch.technologies {
            uc.ai_technologies = technologies
                .iter()
                .flat_map(|t| split_list(t))
                .collect();
        }
        self.touch();
        Ok(())
    }

    pub fn sorted_use_cases(&self, category: UseCaseCategory) -> Vec<UseCase> {
        selected_first(self.use_cases(category), |u| u.selected)
    }

    pub fn selected_use_cases(&self, category: UseCaseCategory) -> Vec<UseCase> {
        self.use_cases(category)
            .iter()
            .filter(|u| u.selected)
            .cloned()
            .collect()
    }

    pub fn rejected_use_cases(&self, category: UseCaseCategory) -> Vec<UseCase> {
        self.use_cases(category)
            .iter()
            .filter(|u| !u.selected)
            .cloned()
            .collect()
    }

    /// Install regenerated proposals. A category whose current selection
    /// already meets `keep_threshold` is left as is.
    pub fn replace_use_cases(&mut self, proposals: UseCaseProposals, keep_threshold: usize) {
        self.use_cases_source = proposals.fingerprint();
        if self.selected_use_cases(UseCaseCategory::QuickWin).len() < keep_threshold {
            self.quick_wins = proposals.quick_wins;
        }
        if self.selected_use_cases(UseCaseCategory::StructurationIa).len() < keep_threshold {
            self.structuration_ia = proposals.structuration_ia;
        }
        self.touch();
    }

    pub fn set_use_cases(&mut self, proposals: UseCaseProposals) {
        self.use_cases_source = proposals.fingerprint();
        self.quick_wins = proposals.quick_wins;
        self.structuration_ia = proposals.structuration_ia;
        self.touch();
    }

    /// Append validated use cases, de-duplicated by title across both
    /// categories. Returns how many were added.
    pub fn accumulate_validated_use_cases(
        &mut self,
        quick_wins: Vec<UseCase>,
        structuration_ia: Vec<UseCase>,
    ) -> usize {
        let before = self.validated_use_cases_count();
        for uc in quick_wins.into_iter().chain(structuration_ia) {
            let key = title_key(&uc.title);
            let seen = self
                .validated_quick_wins
                .iter()
                .chain(self.validated_structuration_ia.iter())
                .any(|u| title_key(&u.title) == key);
            if seen {
                continue;
            }
            match uc.category {
                UseCaseCategory::QuickWin => self.validated_quick_wins.push(uc),
                UseCaseCategory::StructurationIa => self.validated_structuration_ia.push(uc),
            }
        }
        self.touch();
        self.validated_use_cases_count() - before
    }

    pub fn unselect_validated_use_case(
        &mut self,
        id: &str,
        category: UseCaseCategory,
    ) -> Result<UseCase> {
        let list = match category {
            UseCaseCategory::QuickWin => &mut self.validated_quick_wins,
            UseCaseCategory::StructurationIa => &mut self.validated_structuration_ia,
        };
        let pos = list.iter().position(|u| u.id == id).ok_or_else(|| {
            GatewayError::not_found(format!("validated {} use case '{}'", category, id))
        })?;
        let removed = list.remove(pos);
        self.touch();
        Ok(removed)
    }

    pub fn validated_use_cases_count(&self) -> usize {
        self.validated_quick_wins.len() + self.validated_structuration_ia.len()
    }

    // ---- summary -----------------------------------------------------------

    pub fn counts(&self) -> ReviewCounts {
        ReviewCounts {
            proposed_needs: self.needs.len(),
            selected_needs: self.needs.iter().filter(|n| n.selected).count(),
            validated_needs: self.validated_needs.len(),
            proposed_quick_wins: self.quick_wins.len(),
            selected_quick_wins: self.quick_wins.iter().filter(|u| u.selected).count(),
            proposed_structuration_ia: self.structuration_ia.len(),
            selected_structuration_ia: self.structuration_ia.iter().filter(|u| u.selected).count(),
            validated_use_cases: self.validated_use_cases_count(),
        }
    }

    pub fn require_phase(&self, expected: Phase) -> Result<()> {
        if self.phase != expected {
            return Err(GatewayError::validation(format!(
                "session is in phase {:?}, expected {:?}",
                self.phase, expected
            )));
        }
        Ok(())
    }

    pub fn record_error(&mut self, err: &GatewayError) {
        self.last_error = Some(err.to_string());
        self.touch();
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }
}

impl Default for ReviewSession {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON view returned by the HTTP layer: proposals sorted selected-first.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: ReviewSession,
    pub counts: ReviewCounts,
}

impl From<&ReviewSession> for SessionView {
    fn from(session: &ReviewSession) -> Self {
        let mut sorted = session.clone();
        sorted.needs = session.sorted_needs();
        sorted.quick_wins = session.sorted_use_cases(UseCaseCategory::QuickWin);
        sorted.structuration_ia = session.sorted_use_cases(UseCaseCategory::StructurationIa);
        Self {
            counts: session.counts(),
            session: sorted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn need(id: &str, title: &str) -> Need {
        Need {
            id: id.into(),
            title: title.into(),
            citations: vec!["q".into(); 5],
            selected: false,
            edited: false,
        }
    }

    fn uc(id: &str, category: UseCaseCategory, title: &str) -> UseCase {
        UseCase {
            id: id.into(),
            category,
            title: title.into(),
            description: String::new(),
            ai_technologies: Vec::new(),
            selected: false,
        }
    }

    fn session_with_needs(n: usize) -> ReviewSession {
        let mut s = ReviewSession::new();
        s.set_needs(
            (1..=n)
                .map(|i| need(&format!("need_{}", i), &format!("Need {}", i)))
                .collect(),
        );
        s
    }

    #[test]
    fn toggling_and_sorting_puts_selected_first() {
        let mut s = session_with_needs(4);
        assert!(s.toggle_need("need_3").unwrap());
        assert!(s.toggle_need("need_1").unwrap());
        let ids: Vec<_> = s.sorted_needs().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["need_1", "need_3", "need_2", "need_4"]);
        assert!(!s.toggle_need("need_1").unwrap());
        assert_eq!(s.selected_needs().len(), 1);
        assert_eq!(s.rejected_needs().len(), 3);
    }

    #[test]
    fn editing_title_marks_need_edited() {
        let mut s = session_with_needs(1);
        s.edit_need_title("need_1", "  Nouveau titre ").unwrap();
        assert_eq!(s.needs[0].title, "Nouveau titre");
        assert!(s.needs[0].edited);
        assert!(s.edit_need_title("need_1", "   ").is_err());
        assert!(matches!(
            s.toggle_need("missing"),
            Err(GatewayError::NotFound { .. })
        ));
    }

    #[test]
    fn edits_do_not_change_the_delivered_fingerprint() {
        let mut s = session_with_needs(2);
        let delivered = s.needs_source.clone();
        s.edit_need_title("need_1", "Titre revu").unwrap();
        assert_eq!(s.needs_source, delivered);
        assert_ne!(needs_fingerprint(&s.needs), delivered);
    }

    #[test]
    fn accumulated_needs_are_deduplicated_by_title() {
        let mut s = ReviewSession::new();
        assert_eq!(
            s.accumulate_validated_needs(vec![need("a", "Foo"), need("b", "Bar")]),
            2
        );
        assert_eq!(
            s.accumulate_validated_needs(vec![need("c", " foo "), need("d", "Baz")]),
            1
        );
        assert_eq!(s.validated_needs.len(), 3);
        s.unselect_validated_need("b").unwrap();
        assert_eq!(s.validated_needs.len(), 2);
    }

    #[test]
    fn use_case_patch_splits_technologies() {
        let mut s = ReviewSession::new();
        s.set_use_cases(UseCaseProposals {
            quick_wins: vec![uc("qw_1", UseCaseCategory::QuickWin, "A")],
            structuration_ia: vec![],
        });
        let patch: UseCasePatch =
            serde_json::from_value(serde_json::json!({"technologies": "LLM, RAG,", "selected": true}))
                .unwrap();
        s.edit_use_case("qw_1", UseCaseCategory::QuickWin, &patch)
            .unwrap();
        assert_eq!(s.quick_wins[0].ai_technologies, vec!["LLM", "RAG"]);
        assert!(s.quick_wins[0].selected);
        assert!(
            s.edit_use_case("qw_1", UseCaseCategory::StructurationIa, &patch)
                .is_err()
        );
    }

    #[test]
    fn regeneration_keeps_category_with_enough_selected() {
        let mut s = ReviewSession::new();
        let mut qws: Vec<_> = (1..=5)
            .map(|i| uc(&format!("qw_{}", i), UseCaseCategory::QuickWin, &format!("QW {}", i)))
            .collect();
        for u in qws.iter_mut() {
            u.selected = true;
        }
        s.set_use_cases(UseCaseProposals {
            quick_wins: qws,
            structuration_ia: vec![uc("sia_1", UseCaseCategory::StructurationIa, "S")],
        });
        s.replace_use_cases(
            UseCaseProposals {
                quick_wins: vec![uc("qw_9", UseCaseCategory::QuickWin, "new")],
                structuration_ia: vec![uc("sia_9", UseCaseCategory::StructurationIa, "new")],
            },
            5,
        );
        assert_eq!(s.quick_wins.len(), 5);
        assert_eq!(s.structuration_ia[0].id, "sia_9");
    }

    #[test]
    fn validated_use_cases_dedupe_across_categories() {
        let mut s = ReviewSession::new();
        let added = s.accumulate_validated_use_cases(
            vec![uc("qw_1", UseCaseCategory::QuickWin, "Chatbot")],
            vec![
                uc("sia_1", UseCaseCategory::StructurationIa, "chatbot"),
                uc("sia_2", UseCaseCategory::StructurationIa, "Data lake"),
            ],
        );
        assert_eq!(added, 2);
        assert_eq!(s.validated_quick_wins.len(), 1);
        assert_eq!(s.validated_structuration_ia.len(), 1);
    }

    #[test]
    fn reset_keeps_identity() {
        let mut s = session_with_needs(3);
        s.phase = Phase::Needs;
        let id = s.id;
        s.reset();
        assert_eq!(s.id, id);
        assert_eq!(s.phase, Phase::Upload);
        assert!(s.needs.is_empty());
    }

    #[test]
    fn view_sorts_and_counts() {
        let mut s = session_with_needs(3);
        s.toggle_need("need_2").unwrap();
        let view = SessionView::from(&s);
        assert_eq!(view.session.needs[0].id, "need_2");
        assert_eq!(view.counts.selected_needs, 1);
        assert_eq!(view.counts.proposed_needs, 3);
    }
}
