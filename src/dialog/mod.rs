use crate::{Error, Result};
use rsip::prelude::{HeadersExt, UntypedHeader};
use rsip::{Request, Response};

pub mod dialog;
pub mod dialog_layer;

#[cfg(test)]
mod tests;

/// Role of the local endpoint within a dialog.
///
/// The role decides which wire tag is the local one (RFC 3261 §12.1.1 and
/// §12.1.2) and which direction the route set is ordered in. It is fixed at
/// dialog creation and never changes, even though either endpoint may act as
/// client or server for individual transactions later on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DialogRole {
    Uac,
    Uas,
}

impl std::fmt::Display for DialogRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogRole::Uac => write!(f, "UAC"),
            DialogRole::Uas => write!(f, "UAS"),
        }
    }
}

/// SIP Dialog Identifier
///
/// `DialogId` uniquely identifies a SIP dialog. According to RFC 3261, a
/// dialog is identified by the Call-ID, local tag, and remote tag. The tags
/// are endpoint-relative: the same dialog seen from the peer has local and
/// remote swapped.
///
/// The identifier is an immutable value type; [`DialogId::to_string`] is its
/// deterministic key projection, used by the dialog store.
///
/// # Examples
///
/// ```rust
/// use sipdialog::DialogId;
///
/// let dialog_id = DialogId {
///     call_id: "1234567890@example.com".to_string(),
///     local_tag: "alice-tag-123".to_string(),
///     remote_tag: "bob-tag-456".to_string(),
/// };
///
/// println!("Dialog ID: {}", dialog_id);
/// ```
///
/// # Notes
///
/// - During early dialog establishment, `remote_tag` may be an empty string
/// - The identifier remains constant throughout the dialog lifetime
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogId {
    /// Derive a dialog identifier from a request.
    ///
    /// For a UAS the local tag is the To-tag and the remote tag is the
    /// From-tag; for a UAC it is the other way around. The From-tag is
    /// mandatory on any dialog-forming request; the To-tag may still be
    /// absent and yields an empty tag.
    pub fn from_request(request: &Request, role: DialogRole) -> Result<Self> {
        let call_id = request.call_id_header()?.value().to_string();

        let from_tag = match request.from_header()?.tag()? {
            Some(tag) => tag.value().to_string(),
            None => return Err(Error::Error("from tag not found".to_string())),
        };
        let to_tag = match request.to_header()?.tag()? {
            Some(tag) => tag.value().to_string(),
            None => "".to_string(),
        };

        let (local_tag, remote_tag) = match role {
            DialogRole::Uas => (to_tag, from_tag),
            DialogRole::Uac => (from_tag, to_tag),
        };

        Ok(DialogId {
            call_id,
            local_tag,
            remote_tag,
        })
    }

    /// Derive a dialog identifier from a response.
    ///
    /// Responses carry both tags: a response without a To-tag cannot
    /// establish or match a dialog, so a missing tag is an error here.
    pub fn from_response(response: &Response, role: DialogRole) -> Result<Self> {
        let call_id = response.call_id_header()?.value().to_string();

        let from_tag = match response.from_header()?.tag()? {
            Some(tag) => tag.value().to_string(),
            None => return Err(Error::Error("from tag not found".to_string())),
        };
        let to_tag = match response.to_header()?.tag()? {
            Some(tag) => tag.value().to_string(),
            None => return Err(Error::Error("to tag not found".to_string())),
        };

        let (local_tag, remote_tag) = match role {
            DialogRole::Uas => (to_tag, from_tag),
            DialogRole::Uac => (from_tag, to_tag),
        };

        Ok(DialogId {
            call_id,
            local_tag,
            remote_tag,
        })
    }
}

impl std::fmt::Display for DialogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.remote_tag.is_empty() {
            write!(f, "{}-{}", self.call_id, self.local_tag)
        } else {
            write!(f, "{}-{}-{}", self.call_id, self.local_tag, self.remote_tag)
        }
    }
}
