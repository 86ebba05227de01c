use crate::state::{left_neighbor, right_neighbor, Status, StatusTable};

// 哲学者 i が食事を始めてよいか
// 空腹で、かつ左右の哲学者が食事中でないこと
// 副作用はない。true なら呼び出し側が同じクリティカルセクション内で Eating にする
pub fn can_admit<T: StatusTable + ?Sized>(table: &T, i: usize) -> bool {
    let n = table.len();
    table.status(i) == Status::Hungry
        && table.status(left_neighbor(i, n)) != Status::Eating
        && table.status(right_neighbor(i, n)) != Status::Eating
}

// 隣り合う 2 人が同時に食事をしていないか
pub fn neighbors_exclusive<T: StatusTable + ?Sized>(table: &T) -> bool {
    let n = table.len();
    (0..n).all(|i| {
        table.status(i) != Status::Eating || table.status(right_neighbor(i, n)) != Status::Eating
    })
}
