use crate::NodeId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PageError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("Node {node} is not a child of {parent}")]
    NotAChild { parent: NodeId, node: NodeId },

    #[error("Cannot insert {node} into {parent}: would create a cycle")]
    HierarchyRequest { parent: NodeId, node: NodeId },
}
