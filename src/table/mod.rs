// 調停の実装
// どれも状態テーブルを 1 つのロックの内側に置き、同じ can_admit で判定する
// 違うのは待たされた哲学者の眠らせ方と起こし方だけ

pub mod ipc;
pub mod monitor;

pub use ipc::IpcTable;
pub use monitor::MonitorTable;

use crate::error::Result;

// モニタ、セマフォ、リモートのクライアントが共通で実装する
pub trait Coordinator: Send + Sync {
    // id を Hungry にし、食事が許可されるまでブロックする
    // 先に shutdown されたら Thinking に戻して Cancelled を返す。箸は持っていない
    fn request(&self, id: usize) -> Result<()>;

    // 箸を置いて左右の哲学者を再評価する。Eating でなければ何もしない
    fn release(&self, id: usize) -> Result<()>;

    // 待機中の request をすべて起こし、停止に気付かせる
    fn shutdown(&self);
}
