// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Table rendering of binary info for the log.

use binupdate::{BinaryUpdateInfo, BinaryUpdateInfoList};
use log::info;

pub fn binary_info_lines(info: &BinaryUpdateInfo) -> Vec<String> {
    vec![
        format!(" =========== binary [{}] info ============ ", info.name),
        format!(" {:>8} | {:>8}", "Version", "Available size"),
        " -------------------------------------------- ".to_string(),
        format!(" {:>8} | {:>8}", info.version, info.available_size),
        " ============================================ ".to_string(),
    ]
}

pub fn binary_info_list_lines(list: &BinaryUpdateInfoList) -> Vec<String> {
    let mut lines = vec![
        format!(" ============== ALL binary info : {} count ================ ", list.bin_count()),
        format!(" {:>4} | {:>6} | {:>8} | {:>8}", "Idx", "Name", "Version", "Available size"),
        " -------------------------------------------------------- ".to_string(),
    ];
    for (idx, info) in list.iter().enumerate() {
        lines.push(format!(
            " {:>4} | {:>6} | {:>8} | {:>8}",
            idx, info.name, info.version, info.available_size
        ));
    }
    lines.push(" ======================================================== ".to_string());
    lines
}

pub fn version_check_lines(name: &str, pre: &str, cur: &str) -> Vec<String> {
    vec![
        format!(" ========== [{:>5}] Update info =========== ", name),
        format!(" {:>4} | {:>8} ", "Con", "Version"),
        " ----------------------------------------- ".to_string(),
        format!(" {:>4} | {:>8} ", "Pre", pre),
        format!(" {:>4} | {:>8} ", "Cur", cur),
        " ========================================== ".to_string(),
    ]
}

pub fn log_lines(lines: &[String]) {
    for line in lines {
        info!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, version: &str) -> BinaryUpdateInfo {
        BinaryUpdateInfo { name: name.into(), version: version.into(), available_size: 4096 }
    }

    #[test]
    fn list_has_one_row_per_binary() {
        let list = BinaryUpdateInfoList { entries: vec![info("micom", "4"), info("newapp", "20200421")] };
        let lines = binary_info_list_lines(&list);
        assert!(lines[0].contains("2 count"));
        assert_eq!(lines.len(), 3 + 2 + 1);
        assert!(lines[4].contains("newapp") && lines[4].contains("20200421"));
    }

    #[test]
    fn single_info_shows_version_and_size() {
        let lines = binary_info_lines(&info("micom", "3"));
        assert!(lines[0].contains("[micom]"));
        assert!(lines[3].contains('3') && lines[3].contains("4096"));
    }
}
