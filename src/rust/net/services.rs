// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::fs;

//======================================================================================================================
// Constants
//======================================================================================================================

pub const SERVICES_PATH: &str = "/etc/services";
pub const L2TP_SERVICE_NAME: &str = "l2tp";
pub const L2TP_SERVICE_PROTOCOL: &str = "udp";
/// IANA-assigned L2TP port.
pub const L2TP_WELL_KNOWN_PORT: u16 = 1701;

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Looks up `name/protocol` in the system services database.
pub fn resolve_port(name: &str, protocol: &str) -> Result<u16, Fail> {
    let contents: String = match fs::read_to_string(SERVICES_PATH) {
        Ok(contents) => contents,
        Err(e) => {
            let cause: String = format!("cannot read {}: {:?}", SERVICES_PATH, e);
            error!("resolve_port(): {}", cause);
            return Err(Fail::new(libc::ENOENT, &cause));
        },
    };
    match lookup_port(&contents, name, protocol) {
        Some(port) => Ok(port),
        None => {
            let cause: String = format!("no {}/{} entry in {}", name, protocol, SERVICES_PATH);
            error!("resolve_port(): {}", cause);
            Err(Fail::new(libc::ENOENT, &cause))
        },
    }
}

/// Finds a service by name or alias in services(5) formatted text.
pub fn lookup_port(contents: &str, name: &str, protocol: &str) -> Option<u16> {
    for line in contents.lines() {
        let line: &str = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let mut fields = line.split_whitespace();
        let (service, port_proto): (&str, &str) = match (fields.next(), fields.next()) {
            (Some(service), Some(port_proto)) => (service, port_proto),
            _ => continue,
        };
        let (port, proto): (&str, &str) = match port_proto.split_once('/') {
            Some(split) => split,
            None => continue,
        };
        if proto != protocol {
            continue;
        }
        if service == name || fields.any(|alias| alias == name) {
            if let Ok(port) = port.parse::<u16>() {
                return Some(port);
            }
        }
    }
    None
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
