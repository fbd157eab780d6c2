//! Plain-text status answers.

use std::fmt::Write;

use super::ServerStats;
use crate::constants::KEEPER_VERSION;
use crate::FourLetterWord;

pub(crate) const RUOK_REPLY: &str = "imok";

/// Answer to a status word; `Keeper version:` opens `stat` and `srvr`.
pub fn render_four_letter(
    word: FourLetterWord,
    stats: &ServerStats,
) -> String {
    match word {
        FourLetterWord::Ruok => RUOK_REPLY.to_string(),
        FourLetterWord::Stat | FourLetterWord::Srvr => render_stat(stats),
        FourLetterWord::Mntr => render_mntr(stats),
        FourLetterWord::Envi => render_envi(),
    }
}

fn render_stat(stats: &ServerStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Keeper version: {KEEPER_VERSION}");
    let _ = writeln!(out, "Received: {}", stats.packets_received);
    let _ = writeln!(out, "Sent: {}", stats.packets_sent);
    let _ = writeln!(out, "Connections: {}", stats.alive_connections);
    let _ = writeln!(out, "Outstanding: {}", stats.outstanding_requests);
    let _ = writeln!(out, "Zxid: 0x{:x}", stats.last_zxid);
    let _ = writeln!(out, "Mode: standalone");
    let _ = writeln!(out, "Node count: {}", stats.node_count);
    out
}

fn render_mntr(stats: &ServerStats) -> String {
    let rows: [(&str, String); 12] = [
        ("keeper_version", KEEPER_VERSION.to_string()),
        ("keeper_server_state", "standalone".to_string()),
        ("keeper_packets_received", stats.packets_received.to_string()),
        ("keeper_packets_sent", stats.packets_sent.to_string()),
        ("keeper_num_alive_connections", stats.alive_connections.to_string()),
        ("keeper_outstanding_requests", stats.outstanding_requests.to_string()),
        ("keeper_active_sessions", stats.session_count.to_string()),
        ("keeper_znode_count", stats.node_count.to_string()),
        ("keeper_watch_count", stats.watch_count.to_string()),
        ("keeper_ephemerals_count", stats.ephemeral_count.to_string()),
        ("keeper_approximate_data_size", stats.approximate_data_size.to_string()),
        ("keeper_last_zxid", stats.last_zxid.to_string()),
    ];
    let mut out = String::new();
    for (key, value) in rows {
        let _ = writeln!(out, "{key}\t{value}");
    }
    out
}

fn render_envi() -> String {
    let mut out = String::from("Environment:\n");
    let _ = writeln!(out, "keeper.version={KEEPER_VERSION}");
    let _ = writeln!(out, "os.name={}", std::env::consts::OS);
    let _ = writeln!(out, "os.arch={}", std::env::consts::ARCH);
    let _ = writeln!(out, "process.id={}", std::process::id());
    if let Ok(dir) = std::env::current_dir() {
        let _ = writeln!(out, "user.dir={}", dir.display());
    }
    out
}
