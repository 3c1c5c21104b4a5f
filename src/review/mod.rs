pub mod comments;

pub use comments::{
    Comment, CommentCategory, CommentProcessor, DiffAnchors, ResolutionAction,
};
