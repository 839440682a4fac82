//! ACK response construction
//!
//! Builds the general acknowledgment for a received message: MSH reflected
//! with the sending and receiving endpoints swapped, MSA-1 carrying the
//! acknowledgment code and MSA-2 the original control id.

use crate::element::{Element, ElementKind, ValidationLevel};
use crate::{Error, Result};

/// Build an ACK message answering `message` with the given acknowledgment
/// code (`AA`, `AE`, or `AR`)
pub fn build_ack(message: &Element, code: &str) -> Result<Element> {
    if message.kind() != ElementKind::Message {
        return Err(Error::OperationNotAllowed(
            "an ACK answers a message".to_string(),
        ));
    }
    let msh = message
        .first("MSH")?
        .ok_or_else(|| Error::OperationNotAllowed("message has no MSH segment".to_string()))?;

    let mut ack = Element::message("ACK", message.version(), ValidationLevel::Lenient)?;
    ack.set_delimiters(message.effective_delimiters());

    // Reflect the header with the endpoints swapped
    for (source, target) in [
        ("MSH_3", "MSH_5"),
        ("MSH_4", "MSH_6"),
        ("MSH_5", "MSH_3"),
        ("MSH_6", "MSH_4"),
        ("MSH_11", "MSH_11"),
    ] {
        if let Some(field) = msh.first(source)? {
            let text = field.to_er7()?;
            if !text.is_empty() {
                ack.set_value(&format!("MSH/{target}"), &text)?;
            }
        }
    }

    let now = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
    ack.set_value("MSH/MSH_7", &now)?;

    let control_id = msh
        .first("MSH_10")?
        .and_then(Element::value)
        .unwrap_or_default()
        .to_string();
    ack.set_value("MSH/MSH_10", &format!("ACK{control_id}"))?;

    let trigger = msh
        .first("MSH_9/MSG_2")?
        .and_then(Element::value)
        .map(str::to_string);
    let sep = ack.effective_delimiters().component as char;
    let msh_9 = match trigger {
        Some(trigger) => format!("ACK{sep}{trigger}{sep}ACK"),
        None => "ACK".to_string(),
    };
    ack.set_value("MSH/MSH_9", &msh_9)?;

    ack.set_value("MSA/MSA_1", code)?;
    ack.set_value("MSA/MSA_2", &control_id)?;
    Ok(ack)
}
