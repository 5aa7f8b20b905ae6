//! # Models
//!
//! Records shared by the API server and the operator tooling.
//!
//! Everything here is plain data. Records are stored as JSON in Redis and
//! returned as JSON to the frontend, so field names are camelCase and enum
//! values snake_case on the wire.

pub mod attachment;
pub mod bounty;
pub mod comment;
pub mod payloads;
pub mod solution;
pub mod target;
pub mod thread;
pub mod user;
pub mod vote;

pub use attachment::{Attachment, AttachmentKind};
pub use bounty::{Bounty, BountyStatus};
pub use comment::Comment;
pub use solution::{Solution, SolutionStatus};
pub use target::{Target, TargetKind};
pub use thread::{Category, Thread, ThreadStatus, Urgency};
pub use user::{Role, User, UserView};
pub use vote::{VoteKind, VoteOutcome, VoteTally};
