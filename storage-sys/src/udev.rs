// SPDX-License-Identifier: GPL-3.0-only

//! `udevadm info` parsing

use storage_types::UdevInfo;

use crate::cmd;
use crate::config::SysConfig;
use crate::error::{Result, SysError};

/// Query udev for `kname` and parse the record.
pub fn query_udev_info(config: &SysConfig, kname: &str) -> Result<UdevInfo> {
    let name = format!("--name={kname}");
    let stdout = cmd::output(&[
        config.tools.udevadm.as_str(),
        "info",
        "--query=all",
        "--export",
        &name,
    ])?;
    parse_udev_info(&stdout)
}

/// Parse the output of `udevadm info --query=all --export`.
///
/// Each line is `<key>: <payload>`. `P`, `N`, `S` and `E` are collected; the
/// remaining keys current udevadm prints (`M R U T D I L Q V`) are skipped.
pub fn parse_udev_info(text: &str) -> Result<UdevInfo> {
    let mut info = UdevInfo::default();

    for record in text.split("\n\n") {
        for line in record.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            let (key, payload) = split_line(line)?;
            match key {
                'P' => info.sys_path = payload.to_string(),
                'N' => info.name = payload.to_string(),
                'S' => info
                    .symlinks
                    .extend(payload.split_whitespace().map(str::to_string)),
                'E' => {
                    let (name, value) = payload
                        .split_once('=')
                        .ok_or_else(|| SysError::UdevParse(line.to_string()))?;
                    let value = unescape(value);
                    let value = value.trim();
                    let value = value
                        .strip_prefix('\'')
                        .and_then(|v| v.strip_suffix('\''))
                        .unwrap_or(value);
                    info.properties
                        .insert(name.to_string(), value.trim().to_string());
                }
                'M' | 'R' | 'U' | 'T' | 'D' | 'I' | 'L' | 'Q' | 'V' => {}
                _ => return Err(SysError::UdevParse(line.to_string())),
            }
        }
    }

    Ok(info)
}

fn split_line(line: &str) -> Result<(char, &str)> {
    let mut chars = line.chars();
    let key = chars
        .next()
        .filter(char::is_ascii_alphabetic)
        .ok_or_else(|| SysError::UdevParse(line.to_string()))?;
    let rest = chars.as_str();
    let payload = rest
        .strip_prefix(": ")
        .or_else(|| rest.strip_prefix(':'))
        .ok_or_else(|| SysError::UdevParse(line.to_string()))?;
    Ok((key, payload))
}

/// Decode `\xNN` sequences as used by udev's property encoding.
pub fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1] == b'x'
            && bytes[index + 2].is_ascii_hexdigit()
            && bytes[index + 3].is_ascii_hexdigit()
        {
            if let Ok(byte) = u8::from_str_radix(&value[index + 2..index + 4], 16) {
                output.push(byte);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}
