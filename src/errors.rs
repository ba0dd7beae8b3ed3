//! Error types for the Git-Internal crate.
//!
//! This module defines a unified error enumeration used across object parsing,
//! pack encoding/decoding, index handling, caching, and streaming. It integrates
//! with `thiserror` to provide rich `Display` implementations and error source
//! chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Variants cover parse/validation, I/O, encoding/decoding, network/auth,
//!   and custom errors.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the Git-Internal library.
///
/// - Used across object parsing, pack encode/decode, index, caching and streams.
/// - Implements `std::error::Error` via `thiserror`.
pub enum GitError {
    /// Invalid or unsupported git object type name.
    #[error("The `{0}` is not a valid git object type.")]
    InvalidObjectType(String),

    /// Malformed or unsupported blob object encoding.
    #[error("The `{0}` is not a valid git blob object.")]
    InvalidBlobObject(String),

    /// Malformed tree object.
    #[error("Not a valid git tree object.")]
    InvalidTreeObject,

    /// Invalid tree entry (mode/name/hash).
    #[error("The `{0}` is not a valid git tree item.")]
    InvalidTreeItem(String),

    /// Tree contains no entries.
    #[error("`{0}`.")]
    EmptyTreeItems(String),

    /// Invalid commit signature type.
    #[error("The `{0}` is not a valid git commit signature.")]
    InvalidSignatureType(String),

    /// Malformed commit object.
    #[error("Not a valid git commit object.")]
    InvalidCommitObject,

    /// Commit parse or validation failed.
    #[error("Invalid Commit: {0}")]
    InvalidCommit(String),

    /// Malformed tag object.
    #[error("Not a valid git tag object: {0}")]
    InvalidTagObject(String),

    /// Malformed note object.
    #[error("Not a valid git note object: {0}")]
    InvalidNoteObject(String),

    /// Malformed or unsupported index (.idx) file.
    #[error("The `{0}` is not a valid idx file.")]
    InvalidIdxFile(String),

    /// Malformed or unsupported pack file.
    #[error("The `{0}` is not a valid pack file.")]
    InvalidPackFile(String),

    /// Invalid pack header magic or version.
    #[error("The `{0}` is not a valid pack header.")]
    InvalidPackHeader(String),

    /// Malformed or unsupported git index file.
    #[error("The `{0}` is not a valid index file.")]
    InvalidIndexFile(String),

    /// Invalid git index header.
    #[error("The `{0}` is not a valid index header.")]
    InvalidIndexHeader(String),

    /// Invalid CLI or function argument.
    #[error("Argument parse failed: {0}")]
    InvalidArgument(String),

    /// I/O error from underlying reader or writer.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    /// Invalid SHA1 hash formatting or value.
    #[error("The {0} is not a valid Hash value ")]
    InvalidHashValue(String),

    /// Delta object reconstruction error.
    #[error("Delta Object Error Info:{0}")]
    DeltaObjectError(String),

    /// Object not fully populated for packing.
    #[error("The object to be packed is incomplete ,{0}")]
    UnCompletedPackObject(String),

    /// Invalid decoded object info.
    #[error("Error decode in the Object ,info:{0}")]
    InvalidObjectInfo(String),

    /// Hash not found in current file context.
    #[error("Cannot find Hash value: {0} from current file")]
    NotFoundHashValue(String),

    /// Failed to encode object to bytes.
    #[error("Can't encode the object which id [{0}] to bytes")]
    EncodeObjectError(String),

    /// Text encoding or UTF-8 conversion error.
    #[error("UTF-8 conversion error: {0}")]
    ConversionError(String),

    /// Invalid path when locating parent tree.
    #[error("Can't find parent tree by path: {0}")]
    InvalidPathError(String),

    /// Failed to encode pack entries.
    #[error("Can't encode entries to pack: {0}")]
    PackEncodeError(String),

    /// Object missing from caches or storage.
    #[error("Can't find specific object: {0}")]
    ObjectNotFound(String),

    /// Repository not found.
    #[error("Repository not found")]
    RepoNotFound,

    /// Unauthorized access.
    #[error("UnAuthorized: {0}")]
    UnAuthorized(String),

    /// Network communication error.
    #[error("Network Error: {0}")]
    NetworkError(String),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    CustomError(String),

    /// Ref-name or repository-name failed path-security validation.
    #[error("Invalid ref or repository name: {0}")]
    InvalidRefName(String),

    /// Ref-name contains a path-traversal sequence.
    #[error("Path traversal detected in ref name: {0}")]
    PathTraversal(String),

    /// Ref-name resolves to an absolute path.
    #[error("Absolute path not allowed in ref name: {0}")]
    AbsolutePath(String),

    /// Compare-and-swap update failed because the stored value no longer matches `expectedOld`.
    #[error("Ref update conflict on `{0}`: expected {1}, found {2}")]
    Conflict(String, String, String),

    /// Update would not fast-forward the ref.
    #[error("Non-fast-forward update rejected for `{0}`")]
    NonFastForward(String),

    /// Delete command rejected because `delete-refs` was not negotiated.
    #[error("delete-refs not enabled for `{0}`")]
    DeleteRefsDisabled(String),

    /// Branch protection rule rejected the command.
    #[error("Branch protected: {0}")]
    BranchProtected(String),

    /// Symbolic ref resolution found a cycle.
    #[error("Circular reference detected starting at `{0}`")]
    CircularRef(String),

    /// Symbolic ref resolution exceeded the configured depth bound.
    #[error("Max symbolic ref depth exceeded resolving `{0}`")]
    MaxDepthExceeded(String),

    /// Packfile contained a delta whose base never resolved.
    #[error("Unresolved delta object(s): {0}")]
    UnresolvedDelta(String),

    /// A hook rejected the operation.
    #[error("Hook `{0}` rejected the push: {1}")]
    HookRejected(String, String),

    /// A hook exceeded its configured timeout.
    #[error("Hook `{0}` timed out after {1:?}")]
    HookTimeout(String, std::time::Duration),

    /// Webhook dispatch received a 4xx response (not retried).
    #[error("Webhook `{0}` returned client error status {1}")]
    WebhookClientError(String, u16),

    /// Webhook dispatch received a 5xx response (retried).
    #[error("Webhook `{0}` returned server error status {1}")]
    WebhookServerError(String, u16),

    /// Tiered-store migration could not acquire the per-object lock in time.
    #[error("Timed out acquiring migration lock for `{0}`")]
    LockTimeout(String),

    /// Migration referenced an object that isn't tracked by the location index.
    #[error("Object `{0}` not found in tiered store")]
    TieredObjectNotFound(String),

    /// Migration target already holds the object.
    #[error("Object `{0}` already present in target tier")]
    AlreadyInTarget(String),

    /// Migration failed writing to the target tier.
    #[error("Failed writing `{0}` to target tier: {1}")]
    MigrationWriteFailed(String, String),

    /// Post-migration checksum verification failed.
    #[error("Checksum mismatch migrating `{0}`")]
    MigrationChecksumMismatch(String),

    /// Location index update failed after a successful write.
    #[error("Failed to update location index for `{0}`")]
    MigrationUpdateFailed(String),

    /// CDC batch serialization or transport failed after exhausting retries.
    #[error("CDC pipeline error: {0}")]
    CdcError(String),
}
