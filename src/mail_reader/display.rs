use crate::mail_reader::message::Address;

pub const UNKNOWN_ADDRESS: &str = "Unknown";
pub const PREVIEW_CHARS: usize = 150;

/// `Name <address>`, the bare address, or `Unknown`.
pub fn format_address(address: &Address) -> String {
    match (address.name.as_deref(), address.address.as_deref()) {
        (Some(name), Some(addr)) => format!("{} <{}>", name, addr),
        (_, Some(addr)) => addr.to_string(),
        _ => UNKNOWN_ADDRESS.to_string(),
    }
}

pub fn format_addresses(addresses: &[Address]) -> String {
    if addresses.is_empty() {
        return UNKNOWN_ADDRESS.to_string();
    }
    addresses.iter().map(format_address).collect::<Vec<_>>().join(", ")
}

/// Whitespace-collapsed body, cut on a character boundary.
pub fn preview(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= PREVIEW_CHARS {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}
