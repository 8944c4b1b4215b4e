// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Parsing of the kernel TCP socket tables found in /proc/<pid>/net.

use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use log::trace;

use crate::discovery::ListenEndpoint;
use crate::errors::SocketParseError;

pub type Ino = u64;

const TCP_LISTEN: u8 = 0x0A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn table_name(self) -> &'static str {
        match self {
            AddressFamily::V4 => "tcp",
            AddressFamily::V6 => "tcp6",
        }
    }
}

/// Collect the sockets of a table that are in LISTEN state, in file order.
/// A missing or unreadable table yields nothing.
pub fn parse_listen_table(path: &Path, family: AddressFamily) -> Vec<(Ino, ListenEndpoint)> {
    const READ_LIMIT: u64 = 64 * 1024 * 1024; // 64MiB

    let mut result = Vec::new();

    let Ok(table) = fs::File::open(path) else {
        return result;
    };
    let mut table = BufReader::new(table.take(READ_LIMIT));

    let mut line_buf = String::with_capacity(256);

    // Skip the header line
    if table.read_line(&mut line_buf).is_err() {
        return result;
    };

    loop {
        line_buf.clear();
        match table.read_line(&mut line_buf) {
            Ok(0) => break, // EOF
            Ok(_) => match parse_socket_line(&line_buf, family) {
                Ok(Some(entry)) => result.push(entry),
                Ok(None) => continue,
                Err(e) => {
                    trace!("Skipping line in {}: {e}", path.display());
                    continue;
                }
            },
            Err(_) => break,
        }
    }

    result
}

fn get_fields(line: &str) -> Option<(&str, &str, &str)> {
    let mut iter = line.split_whitespace();
    let local_address = iter.nth(1)?; // field 1: local address
    let state = iter.nth(1)?; // field 3: state (skip field 2)
    let inode = iter.nth(5)?; // field 9: inode (skip fields 4-8)
    Some((local_address, state, inode))
}

fn malformed(context: &str) -> SocketParseError {
    SocketParseError::Malformed {
        context: context.to_string(),
    }
}

pub fn parse_socket_line(
    line: &str,
    family: AddressFamily,
) -> Result<Option<(Ino, ListenEndpoint)>, SocketParseError> {
    let (local_address, state, inode) =
        get_fields(line).ok_or_else(|| malformed("failed to parse socket line fields"))?;

    let state =
        u8::from_str_radix(state, 16).map_err(|_| malformed("failed to parse socket state"))?;
    if state != TCP_LISTEN {
        return Ok(None);
    }

    // Local address format: "ADDR:PORT", both hex encoded
    let (address, port) = local_address
        .rsplit_once(':')
        .ok_or_else(|| malformed("no colon found in local address"))?;

    let port = u16::from_str_radix(port, 16).map_err(|_| malformed("failed to parse port"))?;
    if port == 0 {
        return Ok(None);
    }

    let address = decode_address(address, family)?;

    let inode = inode
        .parse::<Ino>()
        .map_err(|_| malformed("failed to parse inode"))?;

    Ok(Some((inode, ListenEndpoint { address, port })))
}

/// Decode the kernel representation of a socket address: the raw in-memory
/// bytes printed as native-endian 32-bit words.
pub fn decode_address(hex: &str, family: AddressFamily) -> Result<IpAddr, SocketParseError> {
    match family {
        AddressFamily::V4 => {
            if hex.len() != 8 {
                return Err(malformed("unexpected IPv4 address length"));
            }
            let word = u32::from_str_radix(hex, 16)
                .map_err(|_| malformed("failed to parse IPv4 address"))?;
            Ok(IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes())))
        }
        AddressFamily::V6 => {
            if hex.len() != 32 {
                return Err(malformed("unexpected IPv6 address length"));
            }
            let mut octets = [0u8; 16];
            for (index, chunk) in octets.chunks_exact_mut(4).enumerate() {
                let start = index * 8;
                let word = hex
                    .get(start..start + 8)
                    .and_then(|part| u32::from_str_radix(part, 16).ok())
                    .ok_or_else(|| malformed("failed to parse IPv6 address"))?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
    }
}
