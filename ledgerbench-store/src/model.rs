//! Documents stored by the reference backend.
//!
//! The ledger consists of four tables modeled after the TPC-B schema, plus an auxiliary
//! `counters` table. Every document is wrapped in a [`Record`] so that a single store can hold
//! all tables, while the typed structs implement [`Entity`] for typed access.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of tellers seeded per branch.
pub const TELLERS_PER_BRANCH: i64 = 10;

/// Number of accounts seeded per branch.
pub const ACCOUNTS_PER_BRANCH: i64 = 100_000;

/// Returns the branch an account is assigned to, distributing accounts round-robin.
pub fn round_robin_branch(aid: i64, scale: i64) -> i64 {
    ((aid - 1).rem_euclid(scale)) + 1
}

/// The tables of the ledger.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Branches,
    Tellers,
    Accounts,
    History,
    Counters,
}

impl Table {
    /// All tables, in the order in which they must be cleared.
    ///
    /// Children come before the parents they reference.
    pub const TEARDOWN_ORDER: [Table; 5] = [
        Table::History,
        Table::Accounts,
        Table::Tellers,
        Table::Branches,
        Table::Counters,
    ];

    /// Returns the table name as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Branches => "branches",
            Table::Tellers => "tellers",
            Table::Accounts => "accounts",
            Table::History => "history",
            Table::Counters => "counters",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown table name.
#[derive(Debug, thiserror::Error)]
#[error("unknown table `{0}`")]
pub struct UnknownTable(String);

impl FromStr for Table {
    type Err = UnknownTable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::TEARDOWN_ORDER
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| UnknownTable(s.to_owned()))
    }
}

/// Store-assigned identifier of a document.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc:{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    pub bid: i64,
    pub balance: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Teller {
    pub tid: i64,
    pub bid: i64,
    pub branch_id: DocumentId,
    pub balance: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub aid: i64,
    pub bid: i64,
    pub branch_id: DocumentId,
    pub balance: i64,
}

/// An append-only record of one applied delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryRecord {
    pub tid: i64,
    pub bid: i64,
    pub aid: i64,
    pub delta: i64,
    /// Milliseconds since the unix epoch.
    pub mtime: u64,
    pub account_id: Option<DocumentId>,
    pub teller_id: Option<DocumentId>,
    pub branch_id: Option<DocumentId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Counter {
    pub name: String,
    pub value: i64,
}

/// A document of any table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Branch(Branch),
    Teller(Teller),
    Account(Account),
    History(HistoryRecord),
    Counter(Counter),
}

impl Record {
    pub fn table(&self) -> Table {
        match self {
            Record::Branch(_) => Table::Branches,
            Record::Teller(_) => Table::Tellers,
            Record::Account(_) => Table::Accounts,
            Record::History(_) => Table::History,
            Record::Counter(_) => Table::Counters,
        }
    }

    /// The value of the table's unique index, if the table has one.
    pub fn key(&self) -> Option<i64> {
        match self {
            Record::Branch(branch) => Some(branch.bid),
            Record::Teller(teller) => Some(teller.tid),
            Record::Account(account) => Some(account.aid),
            Record::History(_) | Record::Counter(_) => None,
        }
    }
}

/// A typed view on one table's documents.
pub trait Entity: Clone + Sized {
    /// The table holding documents of this type.
    const TABLE: Table;

    fn into_record(self) -> Record;

    fn from_record(record: &Record) -> Option<Self>;
}

macro_rules! impl_entity {
    ($ty:ident, $variant:ident, $table:ident) => {
        impl Entity for $ty {
            const TABLE: Table = Table::$table;

            fn into_record(self) -> Record {
                Record::$variant(self)
            }

            fn from_record(record: &Record) -> Option<Self> {
                match record {
                    Record::$variant(inner) => Some(inner.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_entity!(Branch, Branch, Branches);
impl_entity!(Teller, Teller, Tellers);
impl_entity!(Account, Account, Accounts);
impl_entity!(HistoryRecord, History, History);
impl_entity!(Counter, Counter, Counters);
