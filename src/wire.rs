//! The Wire Codec (SPEC_FULL.md §4.1).
//!
//! Parses just enough of a DNS message to read its question, and builds
//! PTR/RCODE responses. Grounded on the teacher's `packed_struct`-based
//! `Header` in `lib.rs`, and on `get_question_qname`'s careful
//! length-bounds checking for label parsing — reimplemented here against
//! this project's own, much smaller record surface.
//!
//! Name encoding is plain length-prefixed labels with no message
//! compression (see SPEC_FULL.md §4.1 for why: every response this system
//! emits carries at most one question and one answer).

use packed_struct::prelude::*;

use crate::enums::{OpCode, PacketType, Rcode, RECORD_CLASS_IN};
use crate::error::{Result, SuperpowersError};

const ANSWER_TTL: u32 = 60;

#[derive(Debug, PackedStruct, PartialEq, Eq, Clone)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "12")]
struct Header {
    #[packed_field(bits = "0..=15", endian = "msb")]
    id: u16,
    #[packed_field(bits = "16", ty = "enum")]
    qr: PacketType,
    #[packed_field(bits = "17..=20", ty = "enum")]
    opcode: OpCode,
    #[packed_field(bits = "21")]
    authoritative: bool,
    #[packed_field(bits = "22")]
    truncated: bool,
    #[packed_field(bits = "23")]
    recursion_desired: bool,
    #[packed_field(bits = "24")]
    recursion_available: bool,
    #[packed_field(bits = "25")]
    z: bool,
    #[packed_field(bits = "26")]
    ad: bool,
    #[packed_field(bits = "27")]
    cd: bool,
    #[packed_field(bits = "28..=31", ty = "enum")]
    rcode: Rcode,
    #[packed_field(bits = "32..=47", endian = "msb")]
    qdcount: u16,
    #[packed_field(bits = "48..=63", endian = "msb")]
    ancount: u16,
    #[packed_field(bits = "64..=79", endian = "msb")]
    nscount: u16,
    #[packed_field(bits = "80..=95", endian = "msb")]
    arcount: u16,
}

const HEADER_BYTES: usize = 12;

/// The result of [`parse_question`]: enough of the incoming request to
/// drive the pipeline and to build a response.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub id: u16,
    pub qname: String,
    pub qtype: u16,
    recursion_desired: bool,
    opcode: OpCode,
    /// The raw question-section bytes (name + qtype + qclass), copied
    /// verbatim into any synthesized response.
    question_section: Vec<u8>,
}

fn decode_name(bytes: &[u8], mut pos: usize) -> Result<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut total_len = 0usize;
    loop {
        let len_byte = *bytes
            .get(pos)
            .ok_or_else(|| SuperpowersError::WireParse("truncated name".to_string()))?;
        if len_byte == 0 {
            pos += 1;
            break;
        }
        if len_byte & 0xC0 != 0 {
            return Err(SuperpowersError::WireParse(
                "message compression pointers are not supported in requests".to_string(),
            ));
        }
        let len = len_byte as usize;
        pos += 1;
        let end = pos
            .checked_add(len)
            .ok_or_else(|| SuperpowersError::WireParse("label length overflow".to_string()))?;
        let label = bytes
            .get(pos..end)
            .ok_or_else(|| SuperpowersError::WireParse("truncated label".to_string()))?;
        let label = std::str::from_utf8(label)
            .map_err(|_| SuperpowersError::WireParse("label is not valid utf-8".to_string()))?;
        labels.push(label.to_lowercase());
        total_len += len + 1;
        if total_len > 255 {
            return Err(SuperpowersError::WireParse("name too long".to_string()));
        }
        pos = end;
    }
    Ok((labels.join("."), pos))
}

fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

/// Parse just the header ID/flags and the question section.
pub fn parse_question(bytes: &[u8]) -> Result<ParsedQuery> {
    if bytes.len() < HEADER_BYTES {
        return Err(SuperpowersError::WireParse(
            "message shorter than a DNS header".to_string(),
        ));
    }
    let header_bytes: [u8; HEADER_BYTES] = bytes[..HEADER_BYTES]
        .try_into()
        .expect("slice length checked above");
    let header = Header::unpack(&header_bytes)
        .map_err(|e| SuperpowersError::WireParse(format!("invalid header: {e}")))?;

    let (qname, mut pos) = decode_name(bytes, HEADER_BYTES)?;
    let qtype_end = pos
        .checked_add(4)
        .ok_or_else(|| SuperpowersError::WireParse("question section overflow".to_string()))?;
    let qtype_class = bytes
        .get(pos..qtype_end)
        .ok_or_else(|| SuperpowersError::WireParse("truncated question".to_string()))?;
    let qtype = u16::from_be_bytes([qtype_class[0], qtype_class[1]]);
    let question_section = bytes[HEADER_BYTES..qtype_end].to_vec();
    pos = qtype_end;
    let _ = pos;

    Ok(ParsedQuery {
        id: header.id,
        qname,
        qtype,
        recursion_desired: header.recursion_desired,
        opcode: header.opcode,
        question_section,
    })
}

fn response_header(query: &ParsedQuery, rcode: Rcode, ancount: u16) -> Result<[u8; HEADER_BYTES]> {
    let header = Header {
        id: query.id,
        qr: PacketType::Answer,
        opcode: query.opcode,
        authoritative: false,
        truncated: false,
        recursion_desired: query.recursion_desired,
        recursion_available: true,
        z: false,
        ad: false,
        cd: false,
        rcode,
        qdcount: 1,
        ancount,
        nscount: 0,
        arcount: 0,
    };
    header
        .pack()
        .map_err(|e| SuperpowersError::WireParse(format!("failed to pack header: {e}")))
}

/// Build a synthesized PTR answer: class IN, the given TTL, RDATA = `fqdn`
/// (normalized to end with exactly one `.`), per SPEC_FULL.md §4.1.
pub fn build_ptr_response(query: &ParsedQuery, fqdn: &str) -> Result<Vec<u8>> {
    let header = response_header(query, Rcode::NoError, 1)?;
    let mut out = Vec::with_capacity(HEADER_BYTES + query.question_section.len() + 32);
    out.extend_from_slice(&header);
    out.extend_from_slice(&query.question_section);

    let normalized = if fqdn.ends_with('.') {
        fqdn.to_string()
    } else {
        format!("{fqdn}.")
    };

    out.extend_from_slice(&encode_name(&query.qname));
    out.extend_from_slice(&crate::enums::PTR_TYPE.to_be_bytes());
    out.extend_from_slice(&RECORD_CLASS_IN.to_be_bytes());
    out.extend_from_slice(&ANSWER_TTL.to_be_bytes());
    let rdata = encode_name(&normalized);
    out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    out.extend_from_slice(&rdata);
    Ok(out)
}

/// Build a response carrying no answer, just the given RCODE (e.g. NXDOMAIN).
pub fn build_rcode_response(query: &ParsedQuery, rcode: Rcode) -> Result<Vec<u8>> {
    let header = response_header(query, rcode, 0)?;
    let mut out = Vec::with_capacity(HEADER_BYTES + query.question_section.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&query.question_section);
    Ok(out)
}

/// Read the RCODE nibble out of a raw response (e.g. the upstream's reply).
pub fn read_rcode(bytes: &[u8]) -> Result<u8> {
    if bytes.len() < HEADER_BYTES {
        return Err(SuperpowersError::WireParse(
            "message shorter than a DNS header".to_string(),
        ));
    }
    Ok(bytes[3] & 0x0F)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ptr_query(id: u16, qname: &str) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_BYTES];
        buf[0..2].copy_from_slice(&id.to_be_bytes());
        buf[2] = 0b0000_0001; // RD=1
        buf[4..6].copy_from_slice(&1u16.to_be_bytes()); // qdcount
        buf.extend_from_slice(&encode_name(qname));
        buf.extend_from_slice(&crate::enums::PTR_TYPE.to_be_bytes());
        buf.extend_from_slice(&RECORD_CLASS_IN.to_be_bytes());
        buf
    }

    #[test]
    fn parse_question_round_trip_preserves_id_and_qname() {
        let bytes = make_ptr_query(0xABCD, "4.3.2.1.in-addr.arpa");
        let parsed = parse_question(&bytes).unwrap();
        assert_eq!(parsed.id, 0xABCD);
        assert_eq!(parsed.qname, "4.3.2.1.in-addr.arpa");
        assert_eq!(parsed.qtype, crate::enums::PTR_TYPE);
    }

    #[test]
    fn ptr_response_rdata_ends_with_single_dot() {
        let bytes = make_ptr_query(1, "4.3.2.1.in-addr.arpa");
        let parsed = parse_question(&bytes).unwrap();
        let response = build_ptr_response(&parsed, "host.example.com").unwrap();
        assert_eq!(read_rcode(&response).unwrap(), 0);

        // Walk past header + question + answer name/type/class/ttl/rdlength
        // to decode the RDATA name and assert it ends with exactly one dot.
        let (_qname, after_question) = decode_name(&response, HEADER_BYTES).unwrap();
        let after_question = after_question + 4; // qtype + qclass
        let (_aname, after_aname) = decode_name(&response, after_question).unwrap();
        let rdlength_pos = after_aname + 8; // type + class + ttl
        let rdlength = u16::from_be_bytes([response[rdlength_pos], response[rdlength_pos + 1]]) as usize;
        let rdata_start = rdlength_pos + 2;
        let rdata = &response[rdata_start..rdata_start + rdlength];
        let (decoded, _) = decode_name(rdata, 0).unwrap();
        assert_eq!(decoded, "host.example.com");
    }

    #[test]
    fn nxdomain_response_carries_no_answer() {
        let bytes = make_ptr_query(2, "4.3.2.1.in-addr.arpa");
        let parsed = parse_question(&bytes).unwrap();
        let response = build_rcode_response(&parsed, Rcode::NameError).unwrap();
        assert_eq!(read_rcode(&response).unwrap(), 3);
    }
}
