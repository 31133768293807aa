//! プロセスピッカー（Application層）
//!
//! プロセス一覧のランキング、選択文法の解析、対話状態機械。
//! 端末I/Oとプロセス列挙はInfrastructure側のドライバが担当し、
//! ここは純粋なロジックのみを持つ。

use tracing::debug;

use crate::domain::types::ProcessInfo;

/// プロセス指定文字列の解析結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessSpec {
    /// PID直接指定
    Pid(u32),
    /// 正規化済みプロセス名
    Name(String),
}

/// プロセス指定文字列を解析
///
/// "pid:1234"と裸の数字はPID、それ以外はパス成分を除いた名前として扱う。
pub fn parse_spec(value: &str) -> ProcessSpec {
    let raw = value.trim();
    if let Some(rest) = raw.to_ascii_lowercase().strip_prefix("pid:") {
        if let Ok(pid) = rest.trim().parse::<u32>() {
            return ProcessSpec::Pid(pid);
        }
    }
    if let Ok(pid) = raw.parse::<u32>() {
        return ProcessSpec::Pid(pid);
    }
    ProcessSpec::Name(normalize_name(raw))
}

/// プロセス名を正規化（引用符とパス成分を除去）
pub fn normalize_name(value: &str) -> String {
    let name = value.trim().trim_matches('"').trim_matches('\'');
    let name = name
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(name);
    name.to_string()
}

/// 2つのプロセス名が一致するか（大文字小文字と".exe"の有無を無視）
pub fn names_match(query: &str, candidate: &str) -> bool {
    let q = normalize_name(query).to_lowercase();
    let c = normalize_name(candidate).to_lowercase();
    let q = strip_exe(&q);
    let c = strip_exe(&c);
    !q.is_empty() && q == c
}

fn strip_exe(name: &str) -> &str {
    name.strip_suffix(".exe").unwrap_or(name)
}

/// クエリに対してプロセス一覧をランク付け
///
/// - 完全一致（".exe"の有無を無視）が最上位
/// - 次に名前またはタイトルへの部分一致。一致位置が早いほど上位、
///   同位置は名前のアルファベット順
/// - 一致しないものは除外、同順位はPID昇順
/// - 空クエリは全件（ウィンドウ持ちが先、名前順、PID順）
pub fn rank(processes: &[ProcessInfo], query: &str) -> Vec<ProcessInfo> {
    let q = normalize_name(query).to_lowercase();

    if q.is_empty() {
        let mut all: Vec<ProcessInfo> = processes.to_vec();
        all.sort_by(|a, b| {
            (!a.has_window(), a.name.to_lowercase(), a.pid).cmp(&(
                !b.has_window(),
                b.name.to_lowercase(),
                b.pid,
            ))
        });
        return all;
    }

    let mut scored: Vec<(u8, usize, String, u32, ProcessInfo)> = Vec::new();
    for proc in processes {
        let name_lower = proc.name.to_lowercase();
        if names_match(&q, &proc.name) {
            scored.push((0, 0, name_lower, proc.pid, proc.clone()));
            continue;
        }
        if let Some(pos) = name_lower.find(&q) {
            scored.push((1, pos, name_lower, proc.pid, proc.clone()));
            continue;
        }
        let title_pos = proc
            .titles
            .iter()
            .filter_map(|t| t.to_lowercase().find(&q))
            .min();
        if let Some(pos) = title_pos {
            scored.push((1, pos, name_lower, proc.pid, proc.clone()));
        }
    }

    scored.sort_by(|a, b| (a.0, a.1, &a.2, a.3).cmp(&(b.0, b.1, &b.2, b.3)));
    scored.into_iter().map(|entry| entry.4).collect()
}

/// 1回の入力の解釈結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerInput {
    /// 空入力（デフォルト受諾または単一候補の選択）
    Empty,
    /// 一覧の再取得
    Refresh,
    /// 全プロセス表示/ウィンドウ持ちのみの切り替え
    ToggleAll,
    /// フィルタ設定
    Filter(String),
    /// フィルタ解除
    ClearFilter,
    /// 表示インデックスによる選択（1始まり）
    Index(usize),
    /// 裸の数字（インデックス優先、範囲外ならPIDとして解釈）
    Digits(u32),
    /// PID直接指定
    Pid(u32),
    /// 自由テキスト（名前としてマッチを試みる）
    Text(String),
}

/// 入力行を選択文法として解析
pub fn parse_input(line: &str) -> PickerInput {
    let raw = line.trim();
    if raw.is_empty() {
        return PickerInput::Empty;
    }

    let lower = raw.to_ascii_lowercase();
    if lower == "r" || lower == "refresh" {
        return PickerInput::Refresh;
    }
    if lower == "all" {
        return PickerInput::ToggleAll;
    }
    if let Some(filter) = raw.strip_prefix('/') {
        let filter = filter.trim();
        if filter.is_empty() || filter.eq_ignore_ascii_case("clear") {
            return PickerInput::ClearFilter;
        }
        return PickerInput::Filter(filter.to_string());
    }
    if let Some(index) = raw.strip_prefix('#') {
        if let Ok(index) = index.trim().parse::<usize>() {
            return PickerInput::Index(index);
        }
        return PickerInput::Text(raw.to_string());
    }
    if let Some(rest) = lower.strip_prefix("pid:") {
        if let Ok(pid) = rest.trim().parse::<u32>() {
            return PickerInput::Pid(pid);
        }
        return PickerInput::Text(raw.to_string());
    }
    if let Ok(digits) = raw.parse::<u32>() {
        return PickerInput::Digits(digits);
    }
    PickerInput::Text(raw.to_string())
}

/// 状態機械の状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerState {
    /// 行単位の入力待ち
    Prompt,
    /// キーストローク単位のライブフィルタ中
    LiveFilter,
    /// ウィンドウなしプロセスの使用確認待ち
    Confirming(ProcessInfo),
}

/// 入力適用の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerEvent {
    /// 選択未確定（再描画して次の入力へ）
    Pending,
    /// PID確定
    Picked(ProcessInfo),
    /// 名前で確定（まだ起動していないプロセス等）
    PickedName(String),
    /// 一覧の再取得が必要
    RefreshRequested,
    /// ユーザーへのメッセージ付きで未確定
    Message(String),
}

/// ピッカーの対話セッション
///
/// プロセス一覧はドライバが供給し、選択が確定するまで
/// apply()に入力を流し込む。
pub struct PickerSession {
    processes: Vec<ProcessInfo>,
    filter: String,
    show_all: bool,
    max_rows: usize,
    default_process: Option<String>,
    state: PickerState,
}

impl PickerSession {
    /// セッションを開始
    pub fn new(show_all: bool, max_rows: usize, default_process: Option<String>) -> Self {
        Self {
            processes: Vec::new(),
            filter: String::new(),
            show_all,
            max_rows,
            default_process,
            state: PickerState::Prompt,
        }
    }

    /// 列挙済みプロセス一覧を反映
    pub fn set_processes(&mut self, processes: Vec<ProcessInfo>) {
        self.processes = if self.show_all {
            processes
        } else {
            processes.into_iter().filter(|p| p.has_window()).collect()
        };
    }

    /// ライブフィルタモードへ移行
    pub fn enter_live(&mut self) {
        if self.state == PickerState::Prompt {
            self.state = PickerState::LiveFilter;
        }
    }

    pub fn state(&self) -> &PickerState {
        &self.state
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn show_all(&self) -> bool {
        self.show_all
    }

    /// 現在のフィルタでランク付けした表示リスト（max_rowsで打ち切り）
    pub fn visible(&self) -> Vec<ProcessInfo> {
        let mut ranked = rank(&self.processes, &self.filter);
        ranked.truncate(self.max_rows);
        ranked
    }

    /// フィルタ適用後の総マッチ数（打ち切り前）
    pub fn match_count(&self) -> usize {
        rank(&self.processes, &self.filter).len()
    }

    /// 入力を1つ適用して状態を進める
    ///
    /// `pid_exists`は裸の数字をPIDとして解釈する際の存在確認に使う。
    pub fn apply(&mut self, input: PickerInput, pid_exists: impl Fn(u32) -> bool) -> PickerEvent {
        if let PickerState::Confirming(_) = self.state {
            return PickerEvent::Message("Awaiting confirmation (y/N)".to_string());
        }

        match input {
            PickerInput::Empty => self.apply_empty(),
            PickerInput::Refresh => PickerEvent::RefreshRequested,
            PickerInput::ToggleAll => {
                self.show_all = !self.show_all;
                PickerEvent::RefreshRequested
            }
            PickerInput::Filter(text) => {
                self.filter = text;
                PickerEvent::Pending
            }
            PickerInput::ClearFilter => {
                self.filter.clear();
                PickerEvent::Pending
            }
            PickerInput::Index(index) => self.select_index(index),
            PickerInput::Digits(digits) => {
                // 表示インデックス優先、範囲外は実在PIDとして解釈
                let visible = self.visible();
                if digits >= 1 && (digits as usize) <= visible.len() {
                    return self.select_index(digits as usize);
                }
                if pid_exists(digits) {
                    return self.pick_by_pid(digits);
                }
                PickerEvent::Message("Invalid selection".to_string())
            }
            PickerInput::Pid(pid) => {
                if pid_exists(pid) {
                    self.pick_by_pid(pid)
                } else {
                    PickerEvent::Message(format!("PID not found: {}", pid))
                }
            }
            PickerInput::Text(text) => self.apply_text(text),
        }
    }

    /// ウィンドウなし確認への応答
    pub fn confirm(&mut self, accept: bool) -> PickerEvent {
        let state = std::mem::replace(&mut self.state, PickerState::Prompt);
        match state {
            PickerState::Confirming(proc) => {
                if accept {
                    debug!(pid = proc.pid, name = %proc.name, "Windowless process accepted");
                    PickerEvent::Picked(proc)
                } else {
                    PickerEvent::Message("Selection cancelled".to_string())
                }
            }
            other => {
                self.state = other;
                PickerEvent::Pending
            }
        }
    }

    fn apply_empty(&mut self) -> PickerEvent {
        // デフォルトプロセスが現在ウィンドウを持つ場合のみ受諾
        if let Some(default) = self.default_process.clone() {
            let default_alive = self
                .processes
                .iter()
                .any(|p| p.has_window() && names_match(&default, &p.name));
            if default_alive {
                return PickerEvent::PickedName(default);
            }
        }
        let visible = self.visible();
        if visible.len() == 1 {
            return self.select_process(visible.into_iter().next().expect("len checked"));
        }
        PickerEvent::Message("Type to filter or use #n to select".to_string())
    }

    fn select_index(&mut self, index: usize) -> PickerEvent {
        let visible = self.visible();
        if index >= 1 && index <= visible.len() {
            let proc = visible[index - 1].clone();
            self.select_process(proc)
        } else {
            PickerEvent::Message("Index out of range".to_string())
        }
    }

    fn pick_by_pid(&mut self, pid: u32) -> PickerEvent {
        if let Some(proc) = self.processes.iter().find(|p| p.pid == pid).cloned() {
            return self.select_process(proc);
        }
        // 一覧にないが実在するPIDは名前解決せずに扱うが、
        // ウィンドウの有無は不明なので必ず確認を通す
        self.select_process(ProcessInfo {
            pid,
            name: format!("pid_{}", pid),
            titles: Vec::new(),
        })
    }

    fn apply_text(&mut self, text: String) -> PickerEvent {
        let matches = rank(&self.processes, &text);
        match matches.len() {
            1 => self.select_process(matches.into_iter().next().expect("len checked")),
            0 => PickerEvent::Message("No matching process found".to_string()),
            _ => {
                // 複数マッチはフィルタとして残して絞り込みを続ける
                self.filter = normalize_name(&text);
                PickerEvent::Pending
            }
        }
    }

    fn select_process(&mut self, proc: ProcessInfo) -> PickerEvent {
        if proc.has_window() {
            PickerEvent::Picked(proc)
        } else {
            let name = proc.name.clone();
            let pid = proc.pid;
            self.state = PickerState::Confirming(proc);
            PickerEvent::Message(format!(
                "Process {} (pid:{}) has no visible window. Use anyway? (y/N)",
                name, pid
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: u32, name: &str, titles: &[&str]) -> ProcessInfo {
        ProcessInfo {
            pid,
            name: name.to_string(),
            titles: titles.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_spec() {
        assert_eq!(parse_spec("pid:123"), ProcessSpec::Pid(123));
        assert_eq!(parse_spec("456"), ProcessSpec::Pid(456));
        assert_eq!(
            parse_spec("C:\\Games\\celeste.exe"),
            ProcessSpec::Name("celeste.exe".to_string())
        );
        assert_eq!(
            parse_spec("  \"game.exe\"  "),
            ProcessSpec::Name("game.exe".to_string())
        );
    }

    #[test]
    fn test_names_match_exe_insensitive() {
        assert!(names_match("Game", "game.exe"));
        assert!(names_match("game.exe", "GAME"));
        assert!(!names_match("game", "games.exe"));
        assert!(!names_match("", ""));
    }

    #[test]
    fn test_rank_exact_before_substring() {
        let procs = vec![
            proc(30, "Other.exe", &["my game session"]),
            proc(20, "EndGame.exe", &[]),
            proc(10, "Game.exe", &["Game"]),
        ];
        let ranked = rank(&procs, "gam");
        // 完全一致はないので部分一致のみ。位置0のGame.exeが先頭
        assert_eq!(ranked[0].pid, 10);
        assert_eq!(ranked[1].pid, 20); // "endgame"内の位置3
        assert_eq!(ranked[2].pid, 30); // タイトル内の一致

        let ranked = rank(&procs, "game.exe");
        assert_eq!(ranked[0].pid, 10); // 完全一致が最優先
    }

    #[test]
    fn test_rank_excludes_non_matches() {
        let procs = vec![proc(1, "Game.exe", &[]), proc(2, "editor.exe", &[])];
        let ranked = rank(&procs, "gam");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].pid, 1);
    }

    #[test]
    fn test_rank_ties_by_pid() {
        let procs = vec![proc(9, "app.exe", &[]), proc(3, "app.exe", &[])];
        let ranked = rank(&procs, "app");
        assert_eq!(ranked[0].pid, 3);
        assert_eq!(ranked[1].pid, 9);
    }

    #[test]
    fn test_rank_empty_query_windowed_first() {
        let procs = vec![
            proc(1, "zeta.exe", &["Z"]),
            proc(2, "alpha.exe", &[]),
            proc(3, "beta.exe", &["B"]),
        ];
        let ranked = rank(&procs, "");
        assert_eq!(ranked[0].pid, 3); // beta（ウィンドウあり、名前順）
        assert_eq!(ranked[1].pid, 1); // zeta（ウィンドウあり）
        assert_eq!(ranked[2].pid, 2); // alpha（ウィンドウなしは後ろ）
    }

    #[test]
    fn test_parse_input_grammar() {
        assert_eq!(parse_input(""), PickerInput::Empty);
        assert_eq!(parse_input("r"), PickerInput::Refresh);
        assert_eq!(parse_input("all"), PickerInput::ToggleAll);
        assert_eq!(parse_input("#3"), PickerInput::Index(3));
        assert_eq!(parse_input("pid:42"), PickerInput::Pid(42));
        assert_eq!(parse_input("7"), PickerInput::Digits(7));
        assert_eq!(
            parse_input("/cele"),
            PickerInput::Filter("cele".to_string())
        );
        assert_eq!(parse_input("/clear"), PickerInput::ClearFilter);
        assert_eq!(parse_input("/"), PickerInput::ClearFilter);
        assert_eq!(
            parse_input("celeste"),
            PickerInput::Text("celeste".to_string())
        );
        assert_eq!(parse_input("#abc"), PickerInput::Text("#abc".to_string()));
    }

    #[test]
    fn test_session_index_selection() {
        let mut session = PickerSession::new(false, 20, None);
        session.set_processes(vec![
            proc(1, "alpha.exe", &["A"]),
            proc(2, "beta.exe", &["B"]),
        ]);

        let event = session.apply(PickerInput::Index(1), |_| false);
        assert_eq!(event, PickerEvent::Picked(proc(1, "alpha.exe", &["A"])));
    }

    #[test]
    fn test_session_digits_prefers_index_over_pid() {
        let mut session = PickerSession::new(false, 20, None);
        session.set_processes(vec![
            proc(100, "alpha.exe", &["A"]),
            proc(2, "beta.exe", &["B"]),
        ]);

        // 2は表示インデックスとして解釈される（PID 2も存在するが）
        let event = session.apply(PickerInput::Digits(2), |_| true);
        assert_eq!(event, PickerEvent::Picked(proc(2, "beta.exe", &["B"])));

        // 範囲外の数字は実在PIDとして解釈
        let event = session.apply(PickerInput::Digits(100), |_| true);
        assert_eq!(event, PickerEvent::Picked(proc(100, "alpha.exe", &["A"])));
    }

    #[test]
    fn test_session_windowless_requires_confirmation() {
        let mut session = PickerSession::new(true, 20, None);
        session.set_processes(vec![proc(5, "daemon.exe", &[])]);

        let event = session.apply(PickerInput::Index(1), |_| false);
        assert!(matches!(event, PickerEvent::Message(_)));
        assert!(matches!(session.state(), PickerState::Confirming(_)));

        // 拒否で選択状態へ戻る
        let event = session.confirm(false);
        assert!(matches!(event, PickerEvent::Message(_)));
        assert_eq!(*session.state(), PickerState::Prompt);

        // 受諾で確定
        session.apply(PickerInput::Index(1), |_| false);
        let event = session.confirm(true);
        assert_eq!(event, PickerEvent::Picked(proc(5, "daemon.exe", &[])));
    }

    #[test]
    fn test_session_pid_outside_list_requires_confirmation() {
        // ウィンドウ持ちのみ表示中、一覧外の実在PID（ウィンドウなしデーモン等）
        let mut session = PickerSession::new(false, 20, None);
        session.set_processes(vec![proc(1, "game.exe", &["Game"])]);

        let event = session.apply(PickerInput::Pid(200), |_| true);
        assert!(matches!(event, PickerEvent::Message(_)));
        assert!(matches!(session.state(), PickerState::Confirming(_)));

        // 受諾して初めて確定する
        let event = session.confirm(true);
        assert_eq!(
            event,
            PickerEvent::Picked(ProcessInfo {
                pid: 200,
                name: "pid_200".to_string(),
                titles: Vec::new(),
            })
        );
    }

    #[test]
    fn test_session_default_shortcut() {
        let mut session =
            PickerSession::new(false, 20, Some("celeste".to_string()));
        session.set_processes(vec![
            proc(1, "Celeste.exe", &["Celeste"]),
            proc(2, "other.exe", &["Other"]),
        ]);

        let event = session.apply(PickerInput::Empty, |_| false);
        assert_eq!(event, PickerEvent::PickedName("celeste".to_string()));
    }

    #[test]
    fn test_session_default_needs_window() {
        let mut session =
            PickerSession::new(true, 20, Some("daemon".to_string()));
        session.set_processes(vec![
            proc(1, "daemon.exe", &[]),
            proc(2, "other.exe", &["Other"]),
        ]);

        // デフォルトはウィンドウなしなので受諾されない
        let event = session.apply(PickerInput::Empty, |_| false);
        assert!(matches!(event, PickerEvent::Message(_)));
    }

    #[test]
    fn test_session_text_single_match_selects() {
        let mut session = PickerSession::new(false, 20, None);
        session.set_processes(vec![
            proc(1, "Celeste.exe", &["Celeste"]),
            proc(2, "editor.exe", &["Editor"]),
        ]);

        let event = session.apply(PickerInput::Text("cele".to_string()), |_| false);
        assert_eq!(
            event,
            PickerEvent::Picked(proc(1, "Celeste.exe", &["Celeste"]))
        );
    }

    #[test]
    fn test_session_text_multiple_matches_sets_filter() {
        let mut session = PickerSession::new(false, 20, None);
        session.set_processes(vec![
            proc(1, "game1.exe", &["G1"]),
            proc(2, "game2.exe", &["G2"]),
        ]);

        let event = session.apply(PickerInput::Text("game".to_string()), |_| false);
        assert_eq!(event, PickerEvent::Pending);
        assert_eq!(session.filter(), "game");
        assert_eq!(session.visible().len(), 2);
    }

    #[test]
    fn test_session_toggle_all_requests_refresh() {
        let mut session = PickerSession::new(false, 20, None);
        let event = session.apply(PickerInput::ToggleAll, |_| false);
        assert_eq!(event, PickerEvent::RefreshRequested);
        assert!(session.show_all());
    }

    #[test]
    fn test_session_max_rows_caps_display() {
        let mut session = PickerSession::new(false, 2, None);
        session.set_processes(vec![
            proc(1, "a.exe", &["A"]),
            proc(2, "b.exe", &["B"]),
            proc(3, "c.exe", &["C"]),
        ]);
        assert_eq!(session.visible().len(), 2);
        assert_eq!(session.match_count(), 3);
    }
}
