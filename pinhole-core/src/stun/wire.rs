//! STUN binding message encoding and decoding (RFC 5389 subset).
//!
//! Pure functions, no I/O. Only the Binding Request / Binding Response
//! exchange is supported, and only the two IPv4 address attributes the
//! mapping discovery needs.

use std::net::SocketAddrV4;

use rand::Rng;

use crate::error::WireError;

pub(crate) const HEADER_LEN: usize = 20;

const BINDING_REQUEST: u16 = 0x0001;
const MAGIC_COOKIE: u32 = 0x2112_A442;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// IPv4 address attributes are exactly 8 bytes: reserved, family, port, addr.
const ADDR_ATTR_LEN: usize = 8;

/// Encode a Binding Request: 20-byte header, no attributes.
///
/// The transaction ID is 96 random bits for uniqueness only; responses are
/// not correlated against it.
pub(crate) fn encode_binding_request() -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    // message length stays zero
    buf[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    rand::thread_rng().fill(&mut buf[8..HEADER_LEN]);
    buf
}

/// Decode a Binding Response into the publicly mapped IPv4 endpoint.
///
/// XOR-MAPPED-ADDRESS is authoritative wherever it appears; MAPPED-ADDRESS
/// is used only when the whole attribute list carries no XOR variant.
pub(crate) fn decode_binding_response(buf: &[u8]) -> Result<SocketAddrV4, WireError> {
    if buf.len() < HEADER_LEN {
        return Err(WireError::Truncated);
    }

    let mut mapped = None;
    let mut pos = HEADER_LEN;
    while pos < buf.len() {
        if pos + 4 > buf.len() {
            return Err(WireError::BadAttribute);
        }
        let attr_type = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
        let attr_len = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize;
        let value_start = pos + 4;
        if value_start + attr_len > buf.len() {
            return Err(WireError::BadAttribute);
        }

        match attr_type {
            ATTR_XOR_MAPPED_ADDRESS => {
                let (ip, port) = decode_addr_value(&buf[value_start..value_start + attr_len])?;
                let ip = ip ^ MAGIC_COOKIE;
                let port = port ^ (MAGIC_COOKIE >> 16) as u16;
                return Ok(SocketAddrV4::new(ip.into(), port));
            }
            ATTR_MAPPED_ADDRESS => {
                let (ip, port) = decode_addr_value(&buf[value_start..value_start + attr_len])?;
                mapped = Some(SocketAddrV4::new(ip.into(), port));
            }
            _ => {}
        }

        pos = value_start + attr_len;
    }

    mapped.ok_or(WireError::MissingAddress)
}

fn decode_addr_value(value: &[u8]) -> Result<(u32, u16), WireError> {
    if value.len() != ADDR_ATTR_LEN {
        return Err(WireError::BadAttribute);
    }
    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
    Ok((ip, port))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    pub(crate) fn attr(attr_type: u16, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + value.len());
        out.extend_from_slice(&attr_type.to_be_bytes());
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value);
        out
    }

    pub(crate) fn addr_value(ip: Ipv4Addr, port: u16) -> [u8; 8] {
        let mut v = [0u8; 8];
        v[1] = 0x01; // IPv4 family
        v[2..4].copy_from_slice(&port.to_be_bytes());
        v[4..8].copy_from_slice(&ip.octets());
        v
    }

    pub(crate) fn xor_addr_value(ip: Ipv4Addr, port: u16) -> [u8; 8] {
        let mut v = addr_value(ip, port);
        let xport = port ^ (MAGIC_COOKIE >> 16) as u16;
        let xip = u32::from(ip) ^ MAGIC_COOKIE;
        v[2..4].copy_from_slice(&xport.to_be_bytes());
        v[4..8].copy_from_slice(&xip.to_be_bytes());
        v
    }

    pub(crate) fn response(attrs: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = attrs.concat();
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&0x0101u16.to_be_bytes()); // Binding Success Response
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        out.extend_from_slice(&[0u8; 12]);
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn request_header_layout() {
        let req = encode_binding_request();
        assert_eq!(&req[0..2], &[0x00, 0x01]);
        assert_eq!(&req[2..4], &[0x00, 0x00]);
        assert_eq!(&req[4..8], &MAGIC_COOKIE.to_be_bytes());
    }

    #[test]
    fn transaction_ids_differ() {
        let a = encode_binding_request();
        let b = encode_binding_request();
        assert_ne!(a[8..], b[8..]);
    }

    #[test]
    fn decodes_xor_mapped_address() {
        let ip = Ipv4Addr::new(203, 0, 113, 7);
        let resp = response(&[attr(ATTR_XOR_MAPPED_ADDRESS, &xor_addr_value(ip, 41000))]);
        let addr = decode_binding_response(&resp).unwrap();
        assert_eq!(addr, SocketAddrV4::new(ip, 41000));
    }

    #[test]
    fn falls_back_to_mapped_address() {
        let ip = Ipv4Addr::new(198, 51, 100, 23);
        let resp = response(&[attr(ATTR_MAPPED_ADDRESS, &addr_value(ip, 5060))]);
        let addr = decode_binding_response(&resp).unwrap();
        assert_eq!(addr, SocketAddrV4::new(ip, 5060));
    }

    #[test]
    fn xor_mapped_wins_in_either_order() {
        let mapped_ip = Ipv4Addr::new(198, 51, 100, 23);
        let xor_ip = Ipv4Addr::new(203, 0, 113, 7);
        let want = SocketAddrV4::new(xor_ip, 41000);

        let xor_last = response(&[
            attr(ATTR_MAPPED_ADDRESS, &addr_value(mapped_ip, 5060)),
            attr(ATTR_XOR_MAPPED_ADDRESS, &xor_addr_value(xor_ip, 41000)),
        ]);
        assert_eq!(decode_binding_response(&xor_last).unwrap(), want);

        let xor_first = response(&[
            attr(ATTR_XOR_MAPPED_ADDRESS, &xor_addr_value(xor_ip, 41000)),
            attr(ATTR_MAPPED_ADDRESS, &addr_value(mapped_ip, 5060)),
        ]);
        assert_eq!(decode_binding_response(&xor_first).unwrap(), want);
    }

    #[test]
    fn unknown_attributes_are_skipped() {
        let ip = Ipv4Addr::new(192, 0, 2, 1);
        let resp = response(&[
            attr(0x8022, b"test server"), // SOFTWARE
            attr(ATTR_XOR_MAPPED_ADDRESS, &xor_addr_value(ip, 3478)),
        ]);
        assert_eq!(
            decode_binding_response(&resp).unwrap(),
            SocketAddrV4::new(ip, 3478)
        );
    }

    #[test]
    fn truncated_header_rejected() {
        assert_eq!(
            decode_binding_response(&[0u8; 19]),
            Err(WireError::Truncated)
        );
    }

    #[test]
    fn attribute_overrunning_buffer_rejected() {
        let mut resp = response(&[attr(ATTR_XOR_MAPPED_ADDRESS, &[0u8; 8])]);
        resp.truncate(resp.len() - 2);
        assert_eq!(
            decode_binding_response(&resp),
            Err(WireError::BadAttribute)
        );
    }

    #[test]
    fn partial_attribute_header_rejected() {
        let mut resp = response(&[]);
        resp.extend_from_slice(&[0x00, 0x01]); // half a TLV header
        assert_eq!(
            decode_binding_response(&resp),
            Err(WireError::BadAttribute)
        );
    }

    #[test]
    fn address_attribute_of_wrong_size_rejected() {
        // 20-byte value as an IPv6 XOR-MAPPED-ADDRESS would carry
        let resp = response(&[attr(ATTR_XOR_MAPPED_ADDRESS, &[0u8; 20])]);
        assert_eq!(
            decode_binding_response(&resp),
            Err(WireError::BadAttribute)
        );
    }

    #[test]
    fn missing_address_rejected() {
        let resp = response(&[attr(0x8022, b"no address here")]);
        assert_eq!(
            decode_binding_response(&resp),
            Err(WireError::MissingAddress)
        );
    }
}
