use super::dialog::{Dialog, DialogEventReceiver, DialogEventSender, DialogState};
use super::{DialogId, DialogRole};
use crate::transaction::TransactionEventSender;
use crate::Result;
use rsip::SipMessage;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use tracing::debug;

/// Internal dialog registry state.
///
/// `dialogs` uses RwLock for concurrent read access with exclusive writes;
/// the map is keyed by the [`DialogId`] string projection.
pub struct DialogLayerInner {
    pub(super) dialogs: RwLock<HashMap<String, Dialog>>,
}
pub type DialogLayerInnerRef = Arc<DialogLayerInner>;

/// SIP Dialog Layer
///
/// `DialogLayer` is the per-user-agent dialog store: the sole authority for
/// dialog existence. It creates dialogs from dialog-forming messages,
/// resolves incoming requests to their dialog, and removes dialogs on
/// termination. An application runs one instance per user agent; several
/// independent user agents in one process each own their own layer.
///
/// # Usage
///
/// ```rust,no_run
/// use sipdialog::dialog::dialog_layer::DialogLayer;
/// use sipdialog::dialog::DialogRole;
/// use tokio::sync::mpsc::unbounded_channel;
///
/// # fn example(invite: rsip::SipMessage, request: &rsip::Request) -> sipdialog::Result<()> {
/// let dialog_layer = DialogLayer::new();
/// let (event_sender, _events) = DialogLayer::new_dialog_event_channel();
/// let (tu_sender, _responses) = unbounded_channel();
///
/// // A dialog-forming INVITE arrived and the session accepted it.
/// let _dialog =
///     dialog_layer.create_dialog(&invite, DialogRole::Uas, None, event_sender, tu_sender)?;
///
/// // Later, route an in-dialog request to its dialog.
/// if let Some(dialog) = dialog_layer.match_request(request) {
///     dialog.receive_request(request)?;
/// }
/// # Ok(())
/// # }
/// ```
///
/// # Lifetime
///
/// Dialogs stay registered until [`DialogLayer::remove_dialog`] is called by
/// the owning session; there is no timeout or garbage collection in this
/// layer. Keep-alive and expiry are the concern of the layers above.
pub struct DialogLayer {
    pub inner: DialogLayerInnerRef,
}

impl Default for DialogLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogLayer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DialogLayerInner {
                dialogs: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Create a dialog from a dialog-forming message and register it.
    ///
    /// For a response the initial state follows the status code (provisional
    /// creates an early dialog); for a request `initial_state` applies, and
    /// defaults to confirmed. Registration is atomic with construction: the
    /// dialog is inserted under the store's write lock before it is returned.
    ///
    /// # Panics
    ///
    /// Panics when a dialog with the same identity is already registered.
    /// With correct Call-ID and tag generation this cannot happen; silently
    /// overwriting the registered dialog would desynchronize call state, so
    /// the invariant violation is fatal.
    pub fn create_dialog(
        &self,
        message: &SipMessage,
        role: DialogRole,
        initial_state: Option<DialogState>,
        event_sender: DialogEventSender,
        tu_sender: TransactionEventSender,
    ) -> Result<Dialog> {
        let dialog = match message {
            SipMessage::Request(request) => Dialog::from_request(
                request,
                role,
                initial_state.unwrap_or(DialogState::Confirmed),
                event_sender,
                tu_sender,
            )?,
            SipMessage::Response(response) => {
                Dialog::from_response(response, role, event_sender, tu_sender)?
            }
        };

        let key = dialog.id().to_string();
        let mut dialogs = self.inner.dialogs.write().unwrap();
        if dialogs.contains_key(&key) {
            panic!("dialog identity collision: {}", key);
        }
        dialogs.insert(key, dialog.clone());
        debug!(id = %dialog.id(), %role, state = %dialog.state(), "dialog created");
        Ok(dialog)
    }

    pub fn len(&self) -> usize {
        self.inner.dialogs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.dialogs.read().unwrap().is_empty()
    }

    pub fn all_dialog_ids(&self) -> Vec<String> {
        self.inner
            .dialogs
            .read()
            .unwrap()
            .keys()
            .cloned()
            .collect::<Vec<_>>()
    }

    pub fn get_dialog(&self, id: &DialogId) -> Option<Dialog> {
        match self.inner.dialogs.read() {
            Ok(dialogs) => dialogs.get(&id.to_string()).cloned(),
            Err(_) => None,
        }
    }

    /// Resolve an incoming request to its dialog.
    ///
    /// Incoming requests are matched from the receiver's perspective, so the
    /// identity is derived with the UAS tag mapping.
    pub fn match_request(&self, request: &rsip::Request) -> Option<Dialog> {
        let id = DialogId::from_request(request, DialogRole::Uas).ok()?;
        self.get_dialog(&id)
    }

    /// Remove a dialog from the store.
    ///
    /// Idempotent: removing an unknown identity is a no-op. On removal the
    /// dialog's cancellation token fires and a terminated event is sent to
    /// the owning session.
    pub fn remove_dialog(&self, id: &DialogId) {
        debug!(%id, "remove dialog");
        self.inner
            .dialogs
            .write()
            .unwrap()
            .remove(&id.to_string())
            .map(|d| d.on_remove());
    }

    /// Convenience constructor for the session-side event channel.
    pub fn new_dialog_event_channel() -> (DialogEventSender, DialogEventReceiver) {
        tokio::sync::mpsc::unbounded_channel()
    }
}
