use thiserror::Error;

use crate::resource::Locus;

/// A watch payload could not be interpreted as the expected resource kind
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The document did not have the shape of the expected kind
    #[error("failed to decode {kind} from watch payload: {source}")]
    Deserialize {
        /// Expected kind
        kind: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// The server sent a `Status` document in place of an object
    #[error("watch delivered a Status instead of a {kind}: {message}")]
    Status {
        /// Expected kind
        kind: String,
        /// Message carried by the status
        message: String,
    },

    /// A typed payload held some other Rust type
    #[error("watch delivered an object of an unexpected type, expected {kind}")]
    UnexpectedType {
        /// Expected kind
        kind: String,
    },
}

/// The watched workload reached a non-successful terminal state
///
/// These are expected outcomes rather than faults of the watch machinery, and are
/// returned as errors so that callers can tell "my build failed" apart from
/// "my watcher broke".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// The resource failed
    #[error(
        "{kind} {name:?} has failed{}",
        failure_suffix(.reason.as_deref(), .message.as_deref(), .locus.as_ref())
    )]
    Failed {
        /// Kind of the failed resource
        kind: String,
        /// Name of the failed resource
        name: String,
        /// Recorded reason, if any
        reason: Option<String>,
        /// Recorded message, if any
        message: Option<String>,
        /// Sub-unit the failure happened in
        locus: Option<Locus>,
    },

    /// The resource was canceled
    #[error("{kind} {name:?} has been canceled")]
    Canceled {
        /// Kind
        kind: String,
        /// Name
        name: String,
    },

    /// The resource was deleted while it was being watched
    #[error("{kind} {name:?} has been deleted")]
    Deleted {
        /// Kind
        kind: String,
        /// Name
        name: String,
    },

    /// The pod executing the resource was deleted
    #[error("Pod {name:?} has been deleted")]
    PodDeleted {
        /// Pod name
        name: String,
    },

    /// The pod reported its containers in an unknown state
    #[error("Pod {name:?} is in an unknown state: {message}")]
    ContainersUnknown {
        /// Pod name
        name: String,
        /// Condition message
        message: String,
    },
}

fn failure_suffix(reason: Option<&str>, message: Option<&str>, locus: Option<&Locus>) -> String {
    let mut out = String::new();
    if let Some(reason) = reason {
        out.push_str(": ");
        out.push_str(reason);
    }
    if let Some(message) = message {
        out.push_str(": ");
        out.push_str(message);
    }
    if let Some(Locus {
        pod: Some(pod),
        container,
    }) = locus
    {
        out.push_str(&format!(" (pod {pod:?}"));
        if let Some(container) = container {
            out.push_str(&format!(", container {container:?}"));
        }
        out.push(')');
    }
    out
}
