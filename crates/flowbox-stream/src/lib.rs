//! Conversation stream engine: filters the unified inbox, keeps tag and
//! status edits consistent with the remote store, and sends replies after an
//! undo window.

mod account;
mod backend;
mod compose;
mod edits;
mod engine;
mod error;
mod events;
mod filter;
pub mod memory;
mod scheduler;
mod send;
mod sync;
mod tags;
mod thread;

pub use account::{
    is_group_handle, is_phone_shaped, matches_account, matches_filter, selectable_accounts,
    AccountOption,
};
pub use backend::{
    CollaboratorError, CommentStore, ConnectionsDirectory, ConversationStore, IdentityProvider,
    Transport,
};
pub use compose::{assemble_reply, ephemeral_message, reply_subject, ReplyDraft};
pub use edits::EditCoordinator;
pub use engine::{Collaborators, InboxEngine};
pub use error::EngineError;
pub use events::{EngineEvent, EventBus};
pub use filter::{
    record_matches_query, run_stages, visible_conversation_ids, FilterInput, Stage, PIPELINE,
};
pub use scheduler::{Scheduler, TaskKey};
pub use send::{DelayedSender, SendPhase, SendState};
pub use sync::{ConversationCache, MergeReport, PollBackoff, SyncCoordinator};
pub use tags::{TagEdit, TagSet, TagVocabulary};
pub use thread::{build_thread, ThreadMessage};
