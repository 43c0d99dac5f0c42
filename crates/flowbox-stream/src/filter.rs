use crate::account::matches_filter;
use crate::tags::TagSet;
use flowbox_core::{
    Conversation, ConversationId, FilterState, SortOrder, StatusFilter, UserId, ViewSelector,
};
use std::collections::HashMap;

/// One step of the visible-list pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ViewPartition,
    AccountScope,
    Category,
    Status,
    Search,
    Sort,
}

/// Stages in the order the inbox applies them.
pub const PIPELINE: [Stage; 6] = [
    Stage::ViewPartition,
    Stage::AccountScope,
    Stage::Category,
    Stage::Status,
    Stage::Search,
    Stage::Sort,
];

/// Everything a stage may read. Stages never touch the conversations
/// themselves, only the working list of references.
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    pub conversations: &'a [Conversation],
    pub filter: &'a FilterState,
    pub user: &'a UserId,
    /// Pre-filtered list for the discussions view, in display order.
    pub discussions: Option<&'a [ConversationId]>,
}

struct WorkingSet<'a> {
    items: Vec<&'a Conversation>,
    /// Set by the view partition when the externally curated list is used.
    bypass_scoping: bool,
}

/// Whole-record substring match: the conversation serialized to JSON,
/// lowercased, must contain the lowercased query.
/// The query is used as typed, surrounding spaces included.
pub fn record_matches_query(conversation: &Conversation, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    let query = query.to_lowercase();
    match serde_json::to_string(conversation) {
        Ok(flat) => flat.to_lowercase().contains(&query),
        Err(err) => {
            tracing::debug!(conversation_id = %conversation.id, error = %err, "conversation not searchable");
            false
        }
    }
}

fn in_view(view: ViewSelector, conversation: &Conversation, user: &UserId) -> bool {
    let owned = conversation.is_owned_by(user);
    let shared_with_me = !owned && conversation.has_participant(user);
    let shared_by_me = owned && conversation.shared_participants().next().is_some();

    match view {
        ViewSelector::Owned => owned && !conversation.is_deleted(),
        ViewSelector::SharedWithMe => shared_with_me && !conversation.is_deleted(),
        ViewSelector::SharedByMe => shared_by_me && !conversation.is_deleted(),
        ViewSelector::Deleted => {
            (owned || shared_with_me || shared_by_me) && conversation.is_deleted()
        }
        ViewSelector::Discussions => false,
    }
}

fn apply_stage<'a>(
    stage: Stage,
    input: &FilterInput<'a>,
    mut set: WorkingSet<'a>,
) -> WorkingSet<'a> {
    let filter = input.filter;
    match stage {
        Stage::ViewPartition => {
            if filter.view == ViewSelector::Discussions {
                let by_id = set
                    .items
                    .iter()
                    .map(|conversation| (&conversation.id, *conversation))
                    .collect::<HashMap<_, _>>();
                set.items = input
                    .discussions
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|id| by_id.get(id).copied())
                    .collect();
                set.bypass_scoping = true;
            } else {
                set.items
                    .retain(|conversation| in_view(filter.view, conversation, input.user));
            }
        }
        Stage::AccountScope if !set.bypass_scoping => {
            set.items
                .retain(|conversation| matches_filter(&filter.account, conversation));
        }
        Stage::Category if !set.bypass_scoping && !filter.categories.is_empty() => {
            set.items
                .retain(|conversation| TagSet::of(conversation).matches_any(&filter.categories));
        }
        Stage::Status if !set.bypass_scoping => {
            if let StatusFilter::Only(status) = filter.status {
                set.items.retain(|conversation| conversation.status == status);
            }
        }
        Stage::Search if !filter.search.is_empty() => {
            set.items
                .retain(|conversation| record_matches_query(conversation, &filter.search));
        }
        Stage::Sort => match filter.sort {
            // sort_by_key is stable; ties keep their incoming order.
            SortOrder::Newest => set
                .items
                .sort_by_key(|conversation| std::cmp::Reverse(conversation.best_timestamp())),
            SortOrder::Oldest => set
                .items
                .sort_by_key(|conversation| conversation.best_timestamp()),
        },
        _ => {}
    }
    set
}

/// Runs `stages` in the given order. An empty working set ends the run.
pub fn run_stages(stages: &[Stage], input: &FilterInput<'_>) -> Vec<ConversationId> {
    let mut set = WorkingSet {
        items: input.conversations.iter().collect(),
        bypass_scoping: false,
    };

    for stage in stages {
        if set.items.is_empty() {
            break;
        }
        set = apply_stage(*stage, input, set);
    }

    set.items.into_iter().map(|c| c.id.clone()).collect()
}

/// Ordered ids of the conversations the user currently sees.
pub fn visible_conversation_ids(
    conversations: &[Conversation],
    filter: &FilterState,
    user: &UserId,
    discussions: Option<&[ConversationId]>,
) -> Vec<ConversationId> {
    run_stages(
        &PIPELINE,
        &FilterInput {
            conversations,
            filter,
            user,
            discussions,
        },
    )
}
