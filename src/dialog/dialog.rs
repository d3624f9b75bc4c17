use super::{DialogId, DialogRole};
use crate::rsip_ext::extract_uri_from_contact;
use crate::transaction::{TransactionEvent, TransactionEventSender};
use crate::{Error, Result};
use rand::Rng;
use rsip::headers::Route;
use rsip::prelude::{HeadersExt, ToTypedHeader, UntypedHeader};
use rsip::typed::CSeq;
use rsip::{Header, Method, Param, Request, Response, StatusCode, StatusCodeKind};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// SIP Dialog State
///
/// A dialog is either early (established by a provisional response) or
/// confirmed (established by a final response). The only legal transition is
/// `Early -> Confirmed`; termination is not a state but removal from the
/// [`DialogLayer`](super::dialog_layer::DialogLayer).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DialogState {
    Early,
    Confirmed,
}

impl DialogState {
    pub fn is_early(&self) -> bool {
        matches!(self, DialogState::Early)
    }
    pub fn is_confirmed(&self) -> bool {
        matches!(self, DialogState::Confirmed)
    }
}

impl std::fmt::Display for DialogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogState::Early => write!(f, "Early"),
            DialogState::Confirmed => write!(f, "Confirmed"),
        }
    }
}

/// Events delivered to the session owning a dialog.
///
/// The sender half is handed in at dialog creation and acts as the
/// non-owning back-reference to the session: the dialog layer never holds
/// the session itself, and a closed receiver is tolerated.
#[derive(Debug)]
pub enum DialogEvent {
    /// An in-dialog request passed every validation step and is handed over
    /// for application-level processing.
    Request(DialogId, Request),
    /// The dialog transitioned to confirmed state.
    Confirmed(DialogId),
    /// The dialog was removed from the dialog layer.
    Terminated(DialogId),
}

pub type DialogEventSender = UnboundedSender<DialogEvent>;
pub type DialogEventReceiver = UnboundedReceiver<DialogEvent>;

/// Collect the route set from the Record-Route headers of a message.
///
/// A UAS sends subsequent requests through the proxies in the order they
/// were traversed, so the header order is kept. A UAC walks the chain in
/// reverse (RFC 3261 §12.1.1/§12.1.2). Getting this wrong makes in-dialog
/// requests bypass proxies that inserted themselves into the path.
pub fn route_set_from_headers(headers: &rsip::Headers, role: DialogRole) -> Vec<Route> {
    let mut route_set: Vec<Route> = headers
        .iter()
        .filter_map(|header| match header {
            Header::RecordRoute(rr) => Some(Route::from(rr.value())),
            _ => None,
        })
        .collect();

    if role == DialogRole::Uac {
        route_set.reverse();
    }
    route_set
}

/// SIP Dialog
///
/// A dialog is a peer-to-peer SIP relationship between two user agents that
/// persists across transactions. Instances are created and registered by the
/// [`DialogLayer`](super::dialog_layer::DialogLayer); all mutation goes
/// through the methods here.
///
/// # Examples
///
/// ```rust,no_run
/// use sipdialog::Dialog;
///
/// # fn example(dialog: Dialog, request: &rsip::Request) -> sipdialog::Result<()> {
/// // Route an incoming in-dialog request: sequence checks run first, then
/// // the request is forwarded to the owning session if accepted.
/// dialog.receive_request(request)?;
///
/// // Build an outgoing in-dialog request.
/// let bye = dialog.make_request(rsip::Method::Bye, None);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Dialog {
    pub(super) inner: DialogInnerRef,
}

pub(super) type DialogInnerRef = Arc<DialogInner>;

/// Shared dialog state.
///
/// Sequence numbers use `0` as the unset sentinel: RFC 3261 CSeq values
/// start at 1 on the wire, and both counters are assigned lazily.
pub struct DialogInner {
    pub role: DialogRole,
    pub id: DialogId,
    pub cancel_token: CancellationToken,
    pub state: Mutex<DialogState>,

    pub local_seq: AtomicU32,
    pub remote_seq: AtomicU32,
    pub is_acknowledged: AtomicBool,

    pub local_uri: rsip::Uri,
    pub remote_uri: rsip::Uri,
    pub remote_target: Mutex<rsip::Uri>,
    pub route_set: Mutex<Vec<Route>>,

    pub(super) event_sender: DialogEventSender,
    pub(super) tu_sender: TransactionEventSender,
}

impl DialogInner {
    pub fn get_local_seq(&self) -> u32 {
        self.local_seq.load(Ordering::Relaxed)
    }

    pub fn increment_local_seq(&self) -> u32 {
        self.local_seq.fetch_add(1, Ordering::Relaxed);
        self.local_seq.load(Ordering::Relaxed)
    }
}

impl Dialog {
    /// Build a dialog from the dialog-forming request.
    ///
    /// The Contact header is mandatory: it becomes the initial remote
    /// target. A UAS whose To header carries no tag yet gets a freshly
    /// generated local tag, which the session must echo in its responses
    /// (see [`Dialog::reply`]).
    pub(super) fn from_request(
        request: &Request,
        role: DialogRole,
        state: DialogState,
        event_sender: DialogEventSender,
        tu_sender: TransactionEventSender,
    ) -> Result<Self> {
        let contact = request.contact_header().map_err(|_| {
            Error::MissingContact(format!("{} request cannot form a dialog", request.method))
        })?;
        let remote_target = extract_uri_from_contact(contact.value())?;

        let mut id = DialogId::from_request(request, role)?;
        if role == DialogRole::Uas && id.local_tag.is_empty() {
            id.local_tag = crate::transaction::make_tag();
        }

        let from = request.from_header()?.typed()?;
        let to = request.to_header()?.typed()?;
        let cseq = request.cseq_header()?.seq()?;
        let route_set = route_set_from_headers(&request.headers, role);

        Ok(Self::assemble(
            id,
            role,
            state,
            from.uri,
            to.uri,
            remote_target,
            route_set,
            cseq,
            event_sender,
            tu_sender,
        ))
    }

    /// Build a dialog from the dialog-forming response.
    ///
    /// The state is derived from the status code: provisional responses
    /// create early dialogs, final responses confirmed ones.
    pub(super) fn from_response(
        response: &Response,
        role: DialogRole,
        event_sender: DialogEventSender,
        tu_sender: TransactionEventSender,
    ) -> Result<Self> {
        let contact = response.contact_header().map_err(|_| {
            Error::MissingContact(format!(
                "{} response cannot form a dialog",
                response.status_code
            ))
        })?;
        let remote_target = extract_uri_from_contact(contact.value())?;

        let id = DialogId::from_response(response, role)?;

        let state = if response.status_code.kind() == StatusCodeKind::Provisional {
            DialogState::Early
        } else {
            DialogState::Confirmed
        };

        let from = response.from_header()?.typed()?;
        let to = response.to_header()?.typed()?;
        let cseq = response.cseq_header()?.seq()?;
        let route_set = route_set_from_headers(&response.headers, role);

        Ok(Self::assemble(
            id,
            role,
            state,
            from.uri,
            to.uri,
            remote_target,
            route_set,
            cseq,
            event_sender,
            tu_sender,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        id: DialogId,
        role: DialogRole,
        state: DialogState,
        from_uri: rsip::Uri,
        to_uri: rsip::Uri,
        remote_target: rsip::Uri,
        route_set: Vec<Route>,
        cseq: u32,
        event_sender: DialogEventSender,
        tu_sender: TransactionEventSender,
    ) -> Self {
        let (local_uri, remote_uri) = match role {
            DialogRole::Uas => (to_uri, from_uri),
            DialogRole::Uac => (from_uri, to_uri),
        };
        let (local_seq, remote_seq) = match role {
            DialogRole::Uas => (0, cseq),
            DialogRole::Uac => (cseq, 0),
        };

        Self {
            inner: Arc::new(DialogInner {
                role,
                id,
                cancel_token: CancellationToken::new(),
                state: Mutex::new(state),
                local_seq: AtomicU32::new(local_seq),
                remote_seq: AtomicU32::new(remote_seq),
                is_acknowledged: AtomicBool::new(false),
                local_uri,
                remote_uri,
                remote_target: Mutex::new(remote_target),
                route_set: Mutex::new(route_set),
                event_sender,
                tu_sender,
            }),
        }
    }

    pub fn id(&self) -> DialogId {
        self.inner.id.clone()
    }

    pub fn role(&self) -> DialogRole {
        self.inner.role
    }

    pub fn state(&self) -> DialogState {
        *self.inner.state.lock().unwrap()
    }

    pub fn is_early(&self) -> bool {
        self.state().is_early()
    }

    pub fn is_confirmed(&self) -> bool {
        self.state().is_confirmed()
    }

    /// Whether the ACK for the initial INVITE transaction has arrived.
    /// Only meaningful for UAS dialogs.
    pub fn is_acknowledged(&self) -> bool {
        self.inner.is_acknowledged.load(Ordering::Relaxed)
    }

    pub fn remote_target(&self) -> rsip::Uri {
        self.inner.remote_target.lock().unwrap().clone()
    }

    pub fn route_set(&self) -> Vec<Route> {
        self.inner.route_set.lock().unwrap().clone()
    }

    pub fn remote_seq(&self) -> u32 {
        self.inner.remote_seq.load(Ordering::Relaxed)
    }

    pub fn local_seq(&self) -> u32 {
        self.inner.get_local_seq()
    }

    /// Cancelled when the dialog is removed from the dialog layer, so
    /// cooperating layers can abandon outstanding work for it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel_token
    }

    pub(super) fn transition(&self, state: DialogState) {
        let mut current = self.inner.state.lock().unwrap();
        match (*current, state) {
            (DialogState::Confirmed, DialogState::Early) => {
                warn!(id = %self.inner.id, "dialog already confirmed, ignoring transition");
            }
            (from, to) if from == to => {}
            (from, to) => {
                debug!(id = %self.inner.id, from = %from, to = %to, "dialog state changed");
                *current = to;
                if to == DialogState::Confirmed {
                    self.inner
                        .event_sender
                        .send(DialogEvent::Confirmed(self.id()))
                        .ok();
                }
            }
        }
    }

    /// Apply a later final response for the dialog-forming transaction.
    ///
    /// Used when a UAC dialog created from a provisional response receives
    /// the 2xx for the same transaction, a common forking outcome. Forces
    /// confirmed state (idempotent) and, for the UAC role, replaces the
    /// whole route set with the one carried by this response
    /// (RFC 3261 §13.2.2.4). The old route set is discarded, never merged.
    pub fn update_from_response(&self, response: &Response) {
        self.transition(DialogState::Confirmed);

        if self.inner.role == DialogRole::Uac {
            let route_set = route_set_from_headers(&response.headers, DialogRole::Uac);
            *self.inner.route_set.lock().unwrap() = route_set;
        }
    }

    /// Validate an incoming in-dialog request against the dialog state.
    ///
    /// Returns `Ok(true)` when the request may be handed to the session and
    /// `Ok(false)` when it was rejected; any rejection response (491 or 500,
    /// with Retry-After where glare avoidance calls for it, RFC 3261 §14.2)
    /// has already been emitted through the transaction sender. Stale ACKs
    /// are discarded without a response. The branch order here follows
    /// RFC 3261 §12.2.2 and must not be rearranged.
    pub fn check_in_dialog_request(&self, request: &Request) -> Result<bool> {
        let cseq = request.cseq_header()?.seq()?;
        let remote_seq = self.inner.remote_seq.load(Ordering::Relaxed);
        let state = self.state();

        match request.method {
            Method::Invite => {
                if remote_seq > 0 && cseq < remote_seq {
                    // retransmitted or out-of-order re-INVITE
                    if state.is_early() {
                        self.reply_retry_after(request)?;
                    } else {
                        self.reply(request, StatusCode::ServerInternalError, None)?;
                    }
                    return Ok(false);
                }
                if state.is_early() {
                    // the dialog-forming INVITE transaction is unresolved
                    self.reply(request, StatusCode::RequestPending, None)?;
                    return Ok(false);
                }
                if self.inner.role == DialogRole::Uas && !self.is_acknowledged() {
                    self.reply_retry_after(request)?;
                    return Ok(false);
                }
                if let Ok(contact) = request.contact_header() {
                    // target refresh request, RFC 3261 §12.2.2
                    *self.inner.remote_target.lock().unwrap() =
                        extract_uri_from_contact(contact.value())?;
                }
            }
            Method::Notify => {
                // target refresh, RFC 6665 §3.2
                if let Ok(contact) = request.contact_header() {
                    *self.inner.remote_target.lock().unwrap() =
                        extract_uri_from_contact(contact.value())?;
                }
            }
            Method::Ack => {
                self.inner.is_acknowledged.store(true, Ordering::Relaxed);
            }
            _ => {}
        }

        if remote_seq == 0 {
            self.inner.remote_seq.store(cseq, Ordering::Relaxed);
        } else if request.method != Method::Invite && cseq < remote_seq {
            if request.method == Method::Ack {
                // never reply to an ACK
                debug!(
                    id = %self.inner.id,
                    cseq,
                    remote_seq,
                    "discarding stale ack"
                );
            } else {
                debug!(
                    id = %self.inner.id,
                    method = %request.method,
                    cseq,
                    remote_seq,
                    "rejecting old in-dialog request"
                );
                self.reply(request, StatusCode::ServerInternalError, None)?;
            }
            return Ok(false);
        } else if cseq > remote_seq {
            self.inner.remote_seq.store(cseq, Ordering::Relaxed);
        }
        // equal CSeq: benign retransmission, accepted unchanged

        Ok(true)
    }

    /// Run the in-dialog checks and forward an accepted request to the
    /// owning session. Rejections have already been answered on the wire and
    /// produce no further effect.
    pub fn receive_request(&self, request: &Request) -> Result<()> {
        if !self.check_in_dialog_request(request)? {
            return Ok(());
        }
        self.inner
            .event_sender
            .send(DialogEvent::Request(self.id(), request.clone()))
            .ok();
        Ok(())
    }

    /// Build an outgoing in-dialog request (RFC 3261 §12.2.1.1).
    ///
    /// CANCEL and ACK echo the CSeq of the request they relate to; every
    /// other method advances the local sequence number first. A dialog that
    /// has not sent a request yet seeds the counter with a random value to
    /// avoid collisions with earlier dialogs on the same transport.
    ///
    /// Via and branch generation are left to the transaction layer; the
    /// eventual response is correlated back to this dialog through
    /// [`DialogId::from_response`].
    pub fn make_request(&self, method: Method, headers: Option<Vec<Header>>) -> Request {
        if self.inner.get_local_seq() == 0 {
            let seed = rand::rng().random_range(1..10_000);
            self.inner.local_seq.store(seed, Ordering::Relaxed);
        }
        let cseq = match method {
            Method::Ack | Method::Cancel => self.inner.get_local_seq(),
            _ => self.inner.increment_local_seq(),
        };

        let mut headers = headers.unwrap_or_default();
        headers.push(Header::CallId(self.inner.id.call_id.clone().into()));

        let from = rsip::typed::From {
            display_name: None,
            uri: self.inner.local_uri.clone(),
            params: vec![],
        }
        .with_tag(self.inner.id.local_tag.clone().into());
        headers.push(Header::From(from.into()));

        let mut to = rsip::typed::To {
            display_name: None,
            uri: self.inner.remote_uri.clone(),
            params: vec![],
        };
        if !self.inner.id.remote_tag.is_empty() {
            to = to.with_tag(self.inner.id.remote_tag.clone().into());
        }
        headers.push(Header::To(to.into()));

        headers.push(Header::CSeq(CSeq { seq: cseq, method }.into()));

        {
            let route_set = self.inner.route_set.lock().unwrap();
            headers.extend(route_set.iter().cloned().map(Header::Route));
        }
        headers.push(Header::MaxForwards(70.into()));
        headers.push(Header::ContentLength(0u32.into()));

        Request {
            method,
            uri: self.inner.remote_target.lock().unwrap().clone(),
            headers: headers.into(),
            body: Default::default(),
            version: rsip::Version::V2,
        }
    }

    /// Answer an incoming request on behalf of this dialog.
    ///
    /// The response is built from the request and handed to the transaction
    /// layer; this is the only way the dialog layer produces protocol
    /// output.
    pub fn reply(
        &self,
        request: &Request,
        status: StatusCode,
        headers: Option<Vec<Header>>,
    ) -> Result<()> {
        let resp = self.make_response(request, status, headers);
        self.inner.tu_sender.send(TransactionEvent::Respond(resp))?;
        Ok(())
    }

    /// 500 with a randomized Retry-After in [1, 10] seconds, used to
    /// desynchronize competing re-INVITE retries (RFC 3261 §14.2).
    fn reply_retry_after(&self, request: &Request) -> Result<()> {
        let retry_after = rand::rng().random_range(1..=10u32);
        self.reply(
            request,
            StatusCode::ServerInternalError,
            Some(vec![Header::RetryAfter(retry_after.to_string().into())]),
        )
    }

    /// Build a response to `request`, copying the headers RFC 3261 §8.2.6
    /// requires and inserting the local tag into To on non-provisional
    /// responses.
    pub(super) fn make_response(
        &self,
        request: &Request,
        status: StatusCode,
        headers: Option<Vec<Header>>,
    ) -> Response {
        let mut resp_headers = rsip::Headers::default();

        for header in request.headers.iter() {
            match header {
                Header::Via(via) => {
                    resp_headers.push(Header::Via(via.clone()));
                }
                Header::From(from) => {
                    resp_headers.push(Header::From(from.clone()));
                }
                Header::To(to) => {
                    let mut to = match to.clone().typed() {
                        Ok(to) => to,
                        Err(e) => {
                            info!(error = %e, "error parsing to header");
                            continue;
                        }
                    };
                    if status != StatusCode::Trying
                        && !to.params.iter().any(|p| matches!(p, Param::Tag(_)))
                    {
                        to.params
                            .push(Param::Tag(self.inner.id.local_tag.clone().into()));
                    }
                    resp_headers.push(Header::To(to.into()));
                }
                Header::CSeq(cseq) => {
                    resp_headers.push(Header::CSeq(cseq.clone()));
                }
                Header::CallId(call_id) => {
                    resp_headers.push(Header::CallId(call_id.clone()));
                }
                Header::RecordRoute(rr) => {
                    resp_headers.push(Header::RecordRoute(rr.clone()));
                }
                _ => {}
            }
        }

        if let Some(headers) = headers {
            for header in headers {
                resp_headers.unique_push(header);
            }
        }

        resp_headers.push(Header::ContentLength(0u32.into()));

        Response {
            status_code: status,
            headers: resp_headers,
            body: Default::default(),
            version: request.version().clone(),
        }
    }

    /// Invoked by the dialog layer when the dialog is removed.
    pub(super) fn on_remove(&self) {
        self.inner.cancel_token.cancel();
        self.inner
            .event_sender
            .send(DialogEvent::Terminated(self.id()))
            .ok();
    }
}
