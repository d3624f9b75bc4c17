use crate::dialog::dialog::{Dialog, DialogEventReceiver, DialogState};
use crate::dialog::dialog_layer::DialogLayer;
use crate::dialog::DialogRole;
use crate::transaction::{TransactionEvent, TransactionEventReceiver};
use rsip::headers::{CSeq, CallId, Contact, From, MaxForwards, RecordRoute, To, Via};
use rsip::prelude::UntypedHeader;
use rsip::{Header, Method, Request, Response, SipMessage, StatusCode, Uri};
use tokio::sync::mpsc::unbounded_channel;


pub(super) fn request(
    method: Method,
    cseq: u32,
    from_tag: &str,
    to_tag: &str,
    call_id: &str,
) -> Request {
    let from = if from_tag.is_empty() {
        "Alice <sip:alice@example.com>".to_string()
    } else {
        format!("Alice <sip:alice@example.com>;tag={}", from_tag)
    };
    let to = if to_tag.is_empty() {
        "Bob <sip:bob@example.com>".to_string()
    } else {
        format!("Bob <sip:bob@example.com>;tag={}", to_tag)
    };
    Request {
        method,
        uri: Uri::try_from("sip:bob@example.com:5060").expect("request uri"),
        headers: vec![
            Via::new("SIP/2.0/UDP alice.example.com:5060;branch=z9hG4bKnashds7").into(),
            CSeq::new(format!("{} {}", cseq, method)).into(),
            From::new(from).into(),
            To::new(to).into(),
            CallId::new(call_id).into(),
            MaxForwards::new("70").into(),
        ]
        .into(),
        version: rsip::Version::V2,
        body: vec![],
    }
}

pub(super) fn invite_request(from_tag: &str, to_tag: &str, call_id: &str) -> Request {
    with_contact(
        request(Method::Invite, 1, from_tag, to_tag, call_id),
        "<sip:alice@alice.example.com:5060>",
    )
}

pub(super) fn with_contact(mut request: Request, line: &str) -> Request {
    request.headers.push(Contact::new(line).into());
    request
}

pub(super) fn with_record_routes(mut request: Request, routes: &[&str]) -> Request {
    for route in routes {
        request.headers.push(RecordRoute::new(*route).into());
    }
    request
}

pub(super) fn invite_response(
    status: StatusCode,
    from_tag: &str,
    to_tag: &str,
    call_id: &str,
    routes: &[&str],
) -> Response {
    let to = if to_tag.is_empty() {
        "Bob <sip:bob@example.com>".to_string()
    } else {
        format!("Bob <sip:bob@example.com>;tag={}", to_tag)
    };
    let mut headers: Vec<Header> = vec![
        Via::new("SIP/2.0/UDP alice.example.com:5060;branch=z9hG4bKnashds7").into(),
        CSeq::new("1 INVITE").into(),
        From::new(format!("Alice <sip:alice@example.com>;tag={}", from_tag)).into(),
        To::new(to).into(),
        CallId::new(call_id).into(),
        Contact::new("<sip:far@end.example.com>").into(),
    ];
    for route in routes {
        headers.push(RecordRoute::new(*route).into());
    }
    Response {
        status_code: status,
        version: rsip::Version::V2,
        headers: headers.into(),
        body: vec![],
    }
}

/// UAS dialog created from an INVITE carrying `invite_cseq`, with a
/// deterministic identity.
pub(super) fn uas_dialog(
    invite_cseq: u32,
    state: DialogState,
) -> (DialogLayer, Dialog, DialogEventReceiver, TransactionEventReceiver) {
    let layer = DialogLayer::new();
    let (event_sender, events) = unbounded_channel();
    let (tu_sender, responses) = unbounded_channel();
    let invite = with_contact(
        request(Method::Invite, invite_cseq, "alice-tag", "bob-tag", "test-call-uas"),
        "<sip:alice@alice.example.com:5060>",
    );
    let dialog = layer
        .create_dialog(
            &SipMessage::Request(invite),
            DialogRole::Uas,
            Some(state),
            event_sender,
            tu_sender,
        )
        .expect("create uas dialog");
    (layer, dialog, events, responses)
}

/// UAC dialog created from a response to the dialog-forming INVITE.
pub(super) fn uac_dialog(
    status: StatusCode,
    routes: &[&str],
) -> (DialogLayer, Dialog, DialogEventReceiver, TransactionEventReceiver) {
    let layer = DialogLayer::new();
    let (event_sender, events) = unbounded_channel();
    let (tu_sender, responses) = unbounded_channel();
    let response = invite_response(status, "alice-tag", "bob-tag", "test-call-uac", routes);
    let dialog = layer
        .create_dialog(
            &SipMessage::Response(response),
            DialogRole::Uac,
            None,
            event_sender,
            tu_sender,
        )
        .expect("create uac dialog");
    (layer, dialog, events, responses)
}

pub(super) fn next_response(responses: &mut TransactionEventReceiver) -> Option<Response> {
    match responses.try_recv() {
        Ok(TransactionEvent::Respond(response)) => Some(response),
        Err(_) => None,
    }
}

pub(super) fn retry_after_value(response: &Response) -> Option<u32> {
    response.headers.iter().find_map(|header| match header {
        Header::RetryAfter(v) => v.value().trim().parse().ok(),
        _ => None,
    })
}

pub(super) fn route_values(request: &Request) -> Vec<String> {
    request
        .headers
        .iter()
        .filter_map(|header| match header {
            Header::Route(route) => Some(route.value().to_string()),
            _ => None,
        })
        .collect()
}
