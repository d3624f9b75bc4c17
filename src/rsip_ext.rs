use crate::Result;
use rsip::prelude::ToTypedHeader;
use rsip::prelude::UntypedHeader;

/// Extract the URI from an untyped Contact header value.
///
/// Accepts both the bare form (`sip:alice@example.com`) and the name-addr
/// form (`"Alice" <sip:alice@example.com;transport=tcp>`).
pub fn extract_uri_from_contact(line: &str) -> Result<rsip::Uri> {
    let contact = rsip::headers::Contact::new(line);
    Ok(contact.typed()?.uri)
}

#[cfg(test)]
mod tests {
    use super::extract_uri_from_contact;

    #[test]
    fn test_extract_uri_from_contact() {
        let uri = extract_uri_from_contact("<sip:far@end.example.com;transport=tcp>")
            .expect("contact with angle brackets");
        assert_eq!(uri.host_with_port.host.to_string(), "end.example.com");

        let uri = extract_uri_from_contact("sip:far@end.example.com").expect("bare contact");
        assert_eq!(uri.host_with_port.host.to_string(), "end.example.com");
    }
}
