// 別プロセスのコーディネータ
// 状態テーブルは serve プロセスにあり、哲学者はそれぞれ TCP コネクションを 1 本持つ

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RemoteTable;
pub use server::Server;
