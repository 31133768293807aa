//! コンソール版ピッカードライバ（Infrastructure層）
//!
//! PickerSessionの状態機械に端末I/Oを接続する。
//! 行入力モードは全プラットフォーム共通、ライブフィルタモードは
//! Windowsのコンソールイベントを直接読む。

use std::io::{BufRead, Write};

use tracing::info;

use crate::application::picker::{parse_input, PickerEvent, PickerSession, PickerState};
use crate::domain::config::PickerConfig;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::ports::ProcessQueryPort;
use crate::domain::types::ProcessInfo;

/// ピッカーの最終結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickedTarget {
    /// 実行中プロセスに確定
    Process(ProcessInfo),
    /// 名前のみで確定（未起動プロセスの先行指定）
    Name(String),
}

/// 対話ピッカーを実行して対象を決める
pub fn run_picker(
    query: &dyn ProcessQueryPort,
    config: &PickerConfig,
    default_process: Option<String>,
) -> DomainResult<PickedTarget> {
    let mut session = PickerSession::new(config.show_all, config.max_rows, default_process);

    if config.live {
        #[cfg(windows)]
        {
            session.enter_live();
            return live_loop(query, &mut session);
        }
        #[cfg(not(windows))]
        tracing::warn!("Live filter mode requires a Windows console, using line mode");
    }
    line_loop(query, &mut session)
}

fn refresh(query: &dyn ProcessQueryPort, session: &mut PickerSession) -> DomainResult<Vec<ProcessInfo>> {
    let all = query.enumerate()?;
    session.set_processes(all.clone());
    Ok(all)
}

fn render(session: &PickerSession) {
    let visible = session.visible();
    let total = session.match_count();

    println!();
    for (index, proc) in visible.iter().enumerate() {
        let title = proc.titles.first().map(String::as_str).unwrap_or("");
        println!("#{:<3} {:>6}  {:<28} {}", index + 1, proc.pid, proc.name, title);
    }
    if total > visible.len() {
        println!("... {} more (narrow with /filter)", total - visible.len());
    }

    let mode = if session.show_all() { "all" } else { "windowed" };
    if session.filter().is_empty() {
        println!("[{} processes, {} shown]", mode, total);
    } else {
        println!("[{} processes, filter: {}, {} matches]", mode, session.filter(), total);
    }
}

/// 行単位の対話ループ
fn line_loop(
    query: &dyn ProcessQueryPort,
    session: &mut PickerSession,
) -> DomainResult<PickedTarget> {
    let stdin = std::io::stdin();
    let mut all = refresh(query, session)?;

    loop {
        render(session);
        let prompt = match session.state() {
            PickerState::Confirming(_) => "Use anyway? (y/N) > ",
            _ => "target > ",
        };
        print!("{}", prompt);
        std::io::stdout().flush().map_err(DomainError::from)?;

        let mut line = String::new();
        let read = stdin
            .lock()
            .read_line(&mut line)
            .map_err(DomainError::from)?;
        if read == 0 {
            return Err(DomainError::Other("Picker aborted (stdin closed)".to_string()));
        }

        let event = if let PickerState::Confirming(_) = session.state() {
            session.confirm(line.trim().eq_ignore_ascii_case("y"))
        } else {
            let pid_exists = |pid: u32| all.iter().any(|p| p.pid == pid);
            session.apply(parse_input(&line), pid_exists)
        };

        match handle_event(event, query, session, &mut all)? {
            Some(target) => return Ok(target),
            None => continue,
        }
    }
}

/// イベント共通処理。確定したらSome
fn handle_event(
    event: PickerEvent,
    query: &dyn ProcessQueryPort,
    session: &mut PickerSession,
    all: &mut Vec<ProcessInfo>,
) -> DomainResult<Option<PickedTarget>> {
    match event {
        PickerEvent::Picked(proc) => {
            info!(pid = proc.pid, name = %proc.name, "Target selected");
            Ok(Some(PickedTarget::Process(proc)))
        }
        PickerEvent::PickedName(name) => {
            info!(name = %name, "Target selected by name");
            Ok(Some(PickedTarget::Name(name)))
        }
        PickerEvent::RefreshRequested => {
            *all = refresh(query, session)?;
            Ok(None)
        }
        PickerEvent::Message(message) => {
            println!("{}", message);
            Ok(None)
        }
        PickerEvent::Pending => Ok(None),
    }
}

/// キーストローク単位のライブフィルタループ（Windows）
///
/// 印字可能文字がフィルタ、BackspaceとEscが編集、Tabが全表示切替、
/// F5が再取得、Enterが行入力文法として確定を試みる。
#[cfg(windows)]
fn live_loop(
    query: &dyn ProcessQueryPort,
    session: &mut PickerSession,
) -> DomainResult<PickedTarget> {
    use windows::Win32::System::Console::{
        GetStdHandle, ReadConsoleInputW, INPUT_RECORD, KEY_EVENT, STD_INPUT_HANDLE,
    };

    use crate::application::picker::PickerInput;

    const VK_BACK: u16 = 0x08;
    const VK_TAB: u16 = 0x09;
    const VK_RETURN: u16 = 0x0D;
    const VK_ESCAPE: u16 = 0x1B;
    const VK_F5: u16 = 0x74;

    let handle = unsafe { GetStdHandle(STD_INPUT_HANDLE) }
        .map_err(|e| DomainError::Other(format!("Console handle unavailable: {}", e)))?;

    let mut all = refresh(query, session)?;
    let mut buffer = String::new();
    render(session);

    loop {
        let mut records = [INPUT_RECORD::default(); 16];
        let mut read = 0u32;
        unsafe { ReadConsoleInputW(handle, &mut records, &mut read) }
            .map_err(|e| DomainError::Other(format!("Console read failed: {}", e)))?;

        let mut dirty = false;
        for record in records.iter().take(read as usize) {
            if record.EventType != KEY_EVENT as u16 {
                continue;
            }
            let key = unsafe { record.Event.KeyEvent };
            if !key.bKeyDown.as_bool() {
                continue;
            }

            // 確認待ち中はy/n以外を無視
            if let PickerState::Confirming(_) = session.state() {
                let ch = unsafe { key.uChar.UnicodeChar };
                let accept = ch == 'y' as u16 || ch == 'Y' as u16;
                let event = session.confirm(accept);
                if let Some(target) = handle_event(event, query, session, &mut all)? {
                    return Ok(target);
                }
                dirty = true;
                continue;
            }

            match key.wVirtualKeyCode {
                VK_RETURN => {
                    let pid_exists = |pid: u32| all.iter().any(|p| p.pid == pid);
                    let event = session.apply(parse_input(&buffer), pid_exists);
                    buffer.clear();
                    if let Some(target) = handle_event(event, query, session, &mut all)? {
                        return Ok(target);
                    }
                    dirty = true;
                }
                VK_TAB => {
                    let event = session.apply(PickerInput::ToggleAll, |_| false);
                    if let Some(target) = handle_event(event, query, session, &mut all)? {
                        return Ok(target);
                    }
                    dirty = true;
                }
                VK_ESCAPE => {
                    buffer.clear();
                    session.apply(PickerInput::ClearFilter, |_| false);
                    dirty = true;
                }
                VK_F5 => {
                    all = refresh(query, session)?;
                    dirty = true;
                }
                VK_BACK => {
                    buffer.pop();
                    session.apply(PickerInput::Filter(buffer.clone()), |_| false);
                    dirty = true;
                }
                _ => {
                    let ch = unsafe { key.uChar.UnicodeChar };
                    if ch >= 0x20 && ch != 0x7F {
                        if let Some(ch) = char::from_u32(ch as u32) {
                            buffer.push(ch);
                            // 選択文法の先頭文字はフィルタには流さない
                            if !buffer.starts_with('#') {
                                session.apply(PickerInput::Filter(buffer.clone()), |_| false);
                            }
                            dirty = true;
                        }
                    }
                }
            }
        }

        if dirty {
            render(session);
            if !buffer.is_empty() {
                print!("> {}", buffer);
                let _ = std::io::stdout().flush();
            }
        }
    }
}
