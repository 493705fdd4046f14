use std::time::Duration;

/// Read isolation requested for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadConcern {
    /// Reads see the latest committed data at statement time.
    #[default]
    Local,
    /// Reads see only data acknowledged by a majority of replicas.
    Majority,
    /// All reads in the transaction see one consistent snapshot.
    Snapshot,
}

/// Durability requested for a transaction's commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteConcern {
    /// Commit returns once the primary has the write.
    Acknowledged,
    /// Commit returns once the write is durable on a majority.
    #[default]
    Majority,
}

/// Options applied when opening a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    pub read_concern: ReadConcern,
    pub write_concern: WriteConcern,
    pub max_duration: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            read_concern: ReadConcern::Local,
            write_concern: WriteConcern::Majority,
            max_duration: Duration::from_secs(30),
        }
    }
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = read_concern;
        self
    }

    pub fn write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = write_concern;
        self
    }

    pub fn max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }
}
