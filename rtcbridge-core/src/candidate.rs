//! ICE candidate attribute grammar.
//!
//! ```text
//! candidate:<foundation> <component> <transport> <priority> <address> <port>
//!     typ <type> [raddr <address> rport <port>] [tcptype <type>]
//! ```
//!
//! The attribute may carry an `a=` prefix. Unknown trailing key/value
//! pairs (such as `generation 0`) are skipped.

use crate::error::SignalingError;
use crate::session::{CandidateType, IceCandidate, TcpType};
use std::str::FromStr;

fn syntax(message: impl Into<String>) -> SignalingError {
    SignalingError::Syntax(message.into())
}

fn number<T: FromStr>(field: &str, value: Option<&str>) -> Result<T, SignalingError> {
    let value = value.ok_or_else(|| syntax(format!("candidate is missing {}", field)))?;
    value
        .parse()
        .map_err(|_| syntax(format!("invalid candidate {}: {}", field, value)))
}

fn text<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, SignalingError> {
    value.ok_or_else(|| syntax(format!("candidate is missing {}", field)))
}

/// Parses a candidate attribute.
pub fn parse_candidate(attribute: &str) -> Result<IceCandidate, SignalingError> {
    let attribute = attribute.trim();
    let attribute = attribute.strip_prefix("a=").unwrap_or(attribute);
    let body = attribute
        .strip_prefix("candidate:")
        .ok_or_else(|| syntax("not a candidate attribute"))?;

    let mut tokens = body.split_whitespace();
    let foundation = text("foundation", tokens.next())?.to_string();
    let component_id: u8 = number("component", tokens.next())?;
    let transport = text("transport", tokens.next())?.to_uppercase();
    let priority: u32 = number("priority", tokens.next())?;
    let address = text("address", tokens.next())?.to_string();
    let port: u16 = number("port", tokens.next())?;

    if tokens.next() != Some("typ") {
        return Err(syntax("candidate is missing typ"));
    }
    let candidate_type = match text("type", tokens.next())? {
        "host" => CandidateType::Host,
        "srflx" => CandidateType::Srflx,
        "prflx" => CandidateType::Prflx,
        "relay" => CandidateType::Relay,
        other => return Err(syntax(format!("unknown candidate type: {}", other))),
    };

    let mut candidate = IceCandidate {
        foundation,
        component_id,
        transport,
        priority,
        address,
        port,
        candidate_type,
        related_address: None,
        related_port: None,
        tcp_type: None,
    };

    while let Some(key) = tokens.next() {
        let value = tokens.next();
        match key {
            "raddr" => candidate.related_address = Some(text("raddr", value)?.to_string()),
            "rport" => candidate.related_port = Some(number("rport", value)?),
            "tcptype" => {
                candidate.tcp_type = Some(match text("tcptype", value)? {
                    "active" => TcpType::Active,
                    "passive" => TcpType::Passive,
                    "so" => TcpType::So,
                    other => return Err(syntax(format!("unknown tcptype: {}", other))),
                });
            }
            _ => {}
        }
    }

    Ok(candidate)
}

/// Formats a candidate attribute without the `a=` prefix.
pub fn format_candidate(candidate: &IceCandidate) -> String {
    let mut attribute = format!(
        "candidate:{} {} {} {} {} {} typ {}",
        candidate.foundation,
        candidate.component_id,
        candidate.transport,
        candidate.priority,
        candidate.address,
        candidate.port,
        candidate.candidate_type.as_str()
    );
    if let Some(address) = &candidate.related_address {
        attribute.push_str(&format!(
            " raddr {} rport {}",
            address,
            candidate.related_port.unwrap_or(9)
        ));
    }
    if let Some(tcp_type) = candidate.tcp_type {
        attribute.push_str(" tcptype ");
        attribute.push_str(tcp_type.as_str());
    }
    attribute
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_host_candidate() {
        let c = parse_candidate("candidate:1 1 udp 2130706431 192.168.1.5 54321 typ host").unwrap();
        assert_eq!(c.foundation, "1");
        assert_eq!(c.component_id, 1);
        assert_eq!(c.transport, "UDP");
        assert_eq!(c.priority, 2130706431);
        assert_eq!(c.address, "192.168.1.5");
        assert_eq!(c.port, 54321);
        assert_eq!(c.candidate_type, CandidateType::Host);
        assert!(c.related_address.is_none());
    }

    #[test]
    fn test_parse_with_prefix_and_extensions() {
        let c = parse_candidate(
            "a=candidate:4 2 TCP 1694498815 203.0.113.7 9 typ srflx raddr 10.0.0.2 rport 9 tcptype active generation 0",
        )
        .unwrap();
        assert_eq!(c.component_id, 2);
        assert_eq!(c.candidate_type, CandidateType::Srflx);
        assert_eq!(c.related_address.as_deref(), Some("10.0.0.2"));
        assert_eq!(c.related_port, Some(9));
        assert_eq!(c.tcp_type, Some(TcpType::Active));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "a=rtcp-mux",
            "candidate:1 1 udp",
            "candidate:1 x udp 1 1.2.3.4 5 typ host",
            "candidate:1 1 udp 1 1.2.3.4 70000 typ host",
            "candidate:1 1 udp 1 1.2.3.4 5 type host",
            "candidate:1 1 udp 1 1.2.3.4 5 typ bogus",
            "candidate:1 1 udp 1 1.2.3.4 5 typ host tcptype weird",
        ] {
            let err = parse_candidate(bad).unwrap_err();
            assert_eq!(err.name(), "SyntaxError", "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_format_relay_candidate() {
        let c = IceCandidate {
            foundation: "7".into(),
            component_id: 1,
            transport: "UDP".into(),
            priority: 16777215,
            address: "198.51.100.1".into(),
            port: 3478,
            candidate_type: CandidateType::Relay,
            related_address: Some("10.0.0.1".into()),
            related_port: Some(5000),
            tcp_type: None,
        };
        assert_eq!(
            format_candidate(&c),
            "candidate:7 1 UDP 16777215 198.51.100.1 3478 typ relay raddr 10.0.0.1 rport 5000"
        );
    }

    proptest! {
        #[test]
        fn prop_format_then_parse(
            foundation in "[a-zA-Z0-9+/]{1,32}",
            component_id in 1u8..=2,
            priority in any::<u32>(),
            port in any::<u16>(),
            octets in any::<[u8; 4]>(),
            typ in 0usize..4,
        ) {
            let candidate_type = [
                CandidateType::Host,
                CandidateType::Srflx,
                CandidateType::Prflx,
                CandidateType::Relay,
            ][typ];
            let related = candidate_type != CandidateType::Host;
            let c = IceCandidate {
                foundation,
                component_id,
                transport: "UDP".into(),
                priority,
                address: format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]),
                port,
                candidate_type,
                related_address: related.then(|| "10.1.2.3".to_string()),
                related_port: related.then_some(port),
                tcp_type: None,
            };
            prop_assert_eq!(parse_candidate(&format_candidate(&c)).unwrap(), c);
        }
    }
}
