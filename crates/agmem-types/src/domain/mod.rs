mod branch;
mod conversation;
mod fact;
mod merge;
mod observation;
mod relation;
mod replay;
mod score;
mod search;
mod session;
mod snapshot;
mod task;
mod template;

pub use branch::{validate_branch_name, Branch, BranchStatus, MAIN_BRANCH};
pub use conversation::{
    Conversation, ConversationStatus, Message, Role, ToolCall,
};
pub use fact::{Fact, FactStatus};
pub use merge::{
    ConflictPolicy, MergeHistory, MergeStrategy, MergeVerdict, MergedBy,
};
pub use observation::{Observation, ObservationType};
pub use relation::{Relation, RelationGraph};
pub use replay::{Replay, ReplayConfig, ReplayStatus};
pub use score::Score;
pub use search::{SearchHit, SearchMode, SearchRequest, SearchScope, TimeRange};
pub use session::{Session, SessionStatus};
pub use snapshot::Snapshot;
pub use task::{Task, TaskAgent, TaskStatus};
pub use template::TemplateBranch;
