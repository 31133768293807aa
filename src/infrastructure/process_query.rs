//! プロセス列挙（Infrastructure層、Windows専用）
//!
//! Toolhelpスナップショットで全プロセス名を取り、
//! EnumWindowsで可視トップレベルウィンドウのタイトルを紐付ける。

use std::collections::BTreeMap;

use tracing::{debug, warn};

use windows::Win32::Foundation::{BOOL, CloseHandle, HWND, LPARAM};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::ports::ProcessQueryPort;
use crate::domain::types::ProcessInfo;

/// Win32 APIベースのプロセス列挙
#[derive(Default)]
pub struct WindowsProcessQuery;

impl WindowsProcessQuery {
    pub fn new() -> Self {
        Self
    }
}

fn wide_to_string(buffer: &[u16]) -> String {
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

/// pid→名前のスナップショット
fn snapshot_processes() -> DomainResult<BTreeMap<u32, String>> {
    let mut names = BTreeMap::new();
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0)
            .map_err(|e| DomainError::Other(format!("Process snapshot failed: {}", e)))?;

        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };
        if Process32FirstW(snapshot, &mut entry).is_ok() {
            loop {
                names.insert(entry.th32ProcessID, wide_to_string(&entry.szExeFile));
                if Process32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }
        let _ = CloseHandle(snapshot);
    }
    Ok(names)
}

/// pid→可視ウィンドウタイトル群
fn window_titles() -> BTreeMap<u32, Vec<String>> {
    unsafe extern "system" fn enum_proc(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let titles = &mut *(lparam.0 as *mut BTreeMap<u32, Vec<String>>);

        if !IsWindowVisible(hwnd).as_bool() {
            return BOOL(1);
        }
        let mut pid = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
        if pid == 0 {
            return BOOL(1);
        }

        let mut buffer = [0u16; 256];
        let len = GetWindowTextW(hwnd, &mut buffer);
        let title = if len > 0 {
            wide_to_string(&buffer)
        } else {
            "<untitled>".to_string()
        };
        titles.entry(pid).or_default().push(title);
        BOOL(1)
    }

    let mut titles: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    unsafe {
        if EnumWindows(
            Some(enum_proc),
            LPARAM(&mut titles as *mut _ as isize),
        )
        .is_err()
        {
            warn!("EnumWindows aborted, window titles may be incomplete");
        }
    }
    titles
}

impl ProcessQueryPort for WindowsProcessQuery {
    fn enumerate(&self) -> DomainResult<Vec<ProcessInfo>> {
        let names = snapshot_processes()?;
        let mut titles = window_titles();

        let processes: Vec<ProcessInfo> = names
            .into_iter()
            .map(|(pid, name)| ProcessInfo {
                pid,
                name,
                titles: titles.remove(&pid).unwrap_or_default(),
            })
            .collect();

        debug!(count = processes.len(), "Processes enumerated");
        Ok(processes)
    }

    fn foreground_pid(&self) -> Option<u32> {
        unsafe {
            let hwnd = GetForegroundWindow();
            if hwnd.0 == 0 {
                return None;
            }
            let mut pid = 0u32;
            GetWindowThreadProcessId(hwnd, Some(&mut pid));
            (pid != 0).then_some(pid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_to_string_stops_at_nul() {
        let buffer: Vec<u16> = "game.exe\0\0garbage"
            .encode_utf16()
            .collect();
        assert_eq!(wide_to_string(&buffer), "game.exe");
    }

    #[test]
    fn test_wide_to_string_without_nul() {
        let buffer: Vec<u16> = "abc".encode_utf16().collect();
        assert_eq!(wide_to_string(&buffer), "abc");
    }
}
