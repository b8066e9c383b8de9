/// Parser for the textual "describe cluster nodes" reply.
///
/// Grounded on `modes/redis/mod.rs::parse_cluster_nodes_output`, generalized
/// to cover everything that function skipped: replicas, the `myself` flag,
/// migrating/importing slot specifiers, and the my-record/friend-record
/// split the source implementation performs. Line framing (`find_resp_end`,
/// `parse_cluster_nodes_response`) is reused for RESP bulk-string framing in
/// `Node::fetch_topology_text`.
use crate::error::ParseError;

use super::arena::NodeHandle;
use super::node::Node;
use super::slot_index::SlotIndex;

/// One parsed "CLUSTER NODES" record.
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub is_myself: bool,
    pub is_replica: bool,
    pub replicate: Option<String>,
    pub slot_ranges: Vec<(u16, u16)>,
    pub migrating: Vec<(u16, String)>,
    pub importing: Vec<(u16, String)>,
}

/// Split the full reply body into records, one per non-empty line.
pub fn parse_nodes_text(text: &str) -> Result<Vec<ParsedRecord>, ParseError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_record)
        .collect()
}

fn parse_record(line: &str) -> Result<ParsedRecord, ParseError> {
    let fields: Vec<&str> = line.split_whitespace().collect();

    let name = fields.first().copied().unwrap_or("").to_string();
    let raw_address = *fields.get(1).ok_or(ParseError::MissingAddress)?;
    let flags = *fields.get(2).ok_or(ParseError::MissingFlags)?;
    let primary = fields.get(3).copied().unwrap_or("-");

    let (ip, port) = parse_address(raw_address)?;
    let is_myself = flags.split(',').any(|f| f == "myself");
    let is_replica = flags.split(',').any(|f| f == "slave") || primary != "-";
    let replicate = (primary != "-").then(|| primary.to_string());

    let mut slot_ranges = Vec::new();
    let mut migrating = Vec::new();
    let mut importing = Vec::new();
    for spec in fields.iter().skip(8) {
        parse_slot_specifier(spec, &mut slot_ranges, &mut migrating, &mut importing)?;
    }

    Ok(ParsedRecord {
        name,
        ip,
        port,
        is_myself,
        is_replica,
        replicate,
        slot_ranges,
        migrating,
        importing,
    })
}

fn parse_address(raw: &str) -> Result<(String, u16), ParseError> {
    let addr = raw.split('@').next().unwrap_or(raw);
    let (ip, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ParseError::InvalidAddress(raw.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ParseError::InvalidAddress(raw.to_string()))?;
    Ok((ip.to_string(), port))
}

fn parse_slot_specifier(
    spec: &str,
    ranges: &mut Vec<(u16, u16)>,
    migrating: &mut Vec<(u16, String)>,
    importing: &mut Vec<(u16, String)>,
) -> Result<(), ParseError> {
    if let Some(inner) = spec.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if let Some((slot_str, peer)) = inner.split_once("->-") {
            let slot = slot_str
                .parse()
                .map_err(|_| ParseError::InvalidSlotSpecifier(spec.to_string()))?;
            migrating.push((slot, peer.to_string()));
        } else if let Some((slot_str, peer)) = inner.split_once("-<-") {
            let slot = slot_str
                .parse()
                .map_err(|_| ParseError::InvalidSlotSpecifier(spec.to_string()))?;
            importing.push((slot, peer.to_string()));
        } else {
            return Err(ParseError::InvalidSlotSpecifier(spec.to_string()));
        }
        return Ok(());
    }

    if let Some((a, b)) = spec.split_once('-') {
        let start: u16 = a
            .parse()
            .map_err(|_| ParseError::InvalidSlotSpecifier(spec.to_string()))?;
        let end: u16 = b
            .parse()
            .map_err(|_| ParseError::InvalidSlotSpecifier(spec.to_string()))?;
        ranges.push((start, end));
        return Ok(());
    }

    let slot: u16 = spec
        .parse()
        .map_err(|_| ParseError::InvalidSlotSpecifier(spec.to_string()))?;
    ranges.push((slot, slot));
    Ok(())
}

/// Apply a record known to carry the `myself` flag onto the Node it
/// describes: name (if unset), role, and slot ownership/migration state.
/// Used both for the seed's own record and, during the per-friend second
/// pass, for a friend's own record.
pub fn apply_self_record(
    record: &ParsedRecord,
    node: &mut Node,
    handle: NodeHandle,
    slot_index: &mut SlotIndex,
) {
    if node.name.is_none() {
        node.name = Some(record.name.clone());
    }
    node.is_replica = record.is_replica;
    node.replicate = record.replicate.clone();

    for &(start, end) in &record.slot_ranges {
        for slot in start..=end {
            node.slots.push(slot);
        }
        slot_index.map_range(start, end, handle);
    }
    node.migrating.extend(record.migrating.iter().cloned());
    node.importing.extend(record.importing.iter().cloned());
}
