use flowbox_core::{
    normalize_tag, same_tag, Conversation, PrimaryTag, TagReplacement, DELETED_TAG,
};
use std::collections::BTreeSet;

/// A conversation's tags: one optional exclusive primary tag plus a set of
/// free-form secondary tags. Secondary tags keep the spelling the store
/// gave them; membership and toggling ignore case and surrounding space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    primary: Option<PrimaryTag>,
    secondary: BTreeSet<String>,
}

impl TagSet {
    pub fn of(conversation: &Conversation) -> Self {
        Self {
            primary: conversation.primary_tag,
            secondary: conversation.secondary_tags.clone(),
        }
    }

    pub fn primary(&self) -> Option<PrimaryTag> {
        self.primary
    }

    pub fn secondary(&self) -> &BTreeSet<String> {
        &self.secondary
    }

    /// Replaces the primary tag; `None` clears it.
    pub fn set_primary(&mut self, tag: Option<PrimaryTag>) {
        self.primary = tag;
    }

    /// Adds `tag` if absent, removes every spelling of it if present. An
    /// empty tag clears the whole secondary set.
    pub fn toggle_secondary(&mut self, tag: &str) {
        let wanted = normalize_tag(tag);
        if wanted.is_empty() {
            self.secondary.clear();
            return;
        }
        let before = self.secondary.len();
        self.secondary
            .retain(|existing| normalize_tag(existing) != wanted);
        if self.secondary.len() == before {
            self.secondary.insert(tag.trim().to_string());
        }
    }

    pub fn has_secondary(&self, tag: &str) -> bool {
        self.secondary.iter().any(|existing| same_tag(existing, tag))
    }

    pub fn is_deleted(&self) -> bool {
        self.has_secondary(DELETED_TAG)
    }

    /// True when the primary tag or any secondary tag is among `categories`.
    pub fn matches_any(&self, categories: &BTreeSet<String>) -> bool {
        categories.iter().any(|category| {
            self.primary
                .map(|primary| same_tag(primary.as_str(), category))
                .unwrap_or(false)
                || self.has_secondary(category)
        })
    }

    /// The full pair, as the store expects it on every edit.
    pub fn into_replacement(self) -> TagReplacement {
        TagReplacement {
            primary_tag: self.primary,
            secondary_tags: self.secondary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEdit {
    SetPrimary(Option<PrimaryTag>),
    ToggleSecondary(String),
}

impl TagEdit {
    /// Soft delete and restore are the same toggle of the reserved tag.
    pub fn toggle_deleted() -> Self {
        Self::ToggleSecondary(DELETED_TAG.to_string())
    }

    pub fn clear_secondary() -> Self {
        Self::ToggleSecondary(String::new())
    }

    pub fn apply(&self, tags: &mut TagSet) {
        match self {
            Self::SetPrimary(tag) => tags.set_primary(*tag),
            Self::ToggleSecondary(tag) => tags.toggle_secondary(tag),
        }
    }
}

/// Suggestion vocabulary offered when adding secondary tags.
#[derive(Debug, Clone)]
pub struct TagVocabulary {
    suggestions: Vec<String>,
}

impl TagVocabulary {
    pub fn new(suggestions: &[String]) -> Self {
        let mut seen = BTreeSet::new();
        let suggestions = suggestions
            .iter()
            .map(|tag| normalize_tag(tag))
            .filter(|tag| !tag.is_empty() && tag != DELETED_TAG)
            .filter(|tag| seen.insert(tag.clone()))
            .collect();
        Self { suggestions }
    }

    /// Suggestions starting with `prefix` that the conversation does not
    /// already carry. The reserved tag is never suggested.
    pub fn suggest(&self, prefix: &str, current: &TagSet) -> Vec<String> {
        let prefix = normalize_tag(prefix);
        self.suggestions
            .iter()
            .filter(|tag| tag.starts_with(&prefix) && !current.has_secondary(tag))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowbox_core::Channel;

    fn tagged() -> TagSet {
        let mut conversation = Conversation::new("c1", "u1", Channel::Email, "a@x.com");
        conversation.primary_tag = Some(PrimaryTag::Sales);
        conversation.secondary_tags.insert("VIP ".to_string());
        TagSet::of(&conversation)
    }

    #[test]
    fn toggling_twice_restores_secondary_set() {
        let original = tagged();
        let mut tags = original.clone();
        tags.toggle_secondary("urgent");
        assert!(tags.has_secondary("urgent"));
        tags.toggle_secondary("urgent");
        assert_eq!(tags, original);
    }

    #[test]
    fn primary_is_exclusive() {
        let mut tags = tagged();
        tags.set_primary(Some(PrimaryTag::Support));
        tags.set_primary(Some(PrimaryTag::Logistics));
        assert_eq!(tags.primary(), Some(PrimaryTag::Logistics));
        tags.set_primary(None);
        assert_eq!(tags.primary(), None);
    }

    #[test]
    fn soft_delete_round_trip_is_lossless() {
        let original = tagged();
        let mut tags = original.clone();
        TagEdit::toggle_deleted().apply(&mut tags);
        assert!(tags.is_deleted());
        TagEdit::toggle_deleted().apply(&mut tags);
        assert_eq!(tags, original);
    }

    #[test]
    fn empty_toggle_clears_all_secondary_tags() {
        let mut tags = tagged();
        tags.toggle_secondary("urgent");
        TagEdit::clear_secondary().apply(&mut tags);
        assert!(tags.secondary().is_empty());
        assert_eq!(tags.primary(), Some(PrimaryTag::Sales));
    }

    #[test]
    fn replacement_carries_the_full_pair() {
        let replacement = tagged().into_replacement();
        assert_eq!(replacement.primary_tag, Some(PrimaryTag::Sales));
        assert_eq!(
            replacement.secondary_tags.into_iter().collect::<Vec<_>>(),
            vec!["VIP ".to_string()]
        );
    }

    #[test]
    fn untouched_tags_keep_their_spelling() {
        let mut tags = tagged();
        tags.set_primary(Some(PrimaryTag::Support));
        tags.toggle_secondary("Urgent");
        assert_eq!(
            tags.secondary().iter().collect::<Vec<_>>(),
            vec!["Urgent", "VIP "]
        );
        tags.toggle_secondary("vip");
        assert_eq!(tags.secondary().iter().collect::<Vec<_>>(), vec!["Urgent"]);
    }

    #[test]
    fn reserved_tag_matches_any_spelling() {
        let mut tags = tagged();
        tags.toggle_secondary("Deleted");
        assert!(tags.is_deleted());
        TagEdit::toggle_deleted().apply(&mut tags);
        assert!(!tags.is_deleted());
        assert_eq!(tags, tagged());
    }

    #[test]
    fn category_match_covers_primary_and_secondary() {
        let tags = tagged();
        let wanted = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
        assert!(tags.matches_any(&wanted(&["SALES"])));
        assert!(tags.matches_any(&wanted(&["vip"])));
        assert!(!tags.matches_any(&wanted(&["support", "urgent"])));
    }

    #[test]
    fn vocabulary_skips_reserved_and_present_tags() {
        let vocabulary = TagVocabulary::new(&[
            "vip".to_string(),
            "Deleted".to_string(),
            "Urgent".to_string(),
            "urgent".to_string(),
            "invoice".to_string(),
        ]);
        assert_eq!(vocabulary.suggest("", &tagged()), vec!["urgent", "invoice"]);
        assert_eq!(vocabulary.suggest("in", &tagged()), vec!["invoice"]);
    }
}
