use serde::{Deserialize, Serialize};

use crate::{
    DbErr, Result,
    codec::{Tensor, TensorRecord},
};

/// The persisted form of a `Snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub vars: Vec<TensorRecord>,
}

/// The persisted form of an `UpdateRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntry {
    pub num_examples: u64,
    pub vars: Vec<TensorRecord>,
}

/// One version of the global model's variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    vars: Vec<Tensor>,
}

impl Snapshot {
    /// Creates a new `Snapshot`.
    ///
    /// # Arguments
    /// * `vars` - The model's variables, in the model's order.
    ///
    /// # Returns
    /// A new `Snapshot` instance.
    pub fn new(vars: Vec<Tensor>) -> Self {
        Self { vars }
    }

    pub fn vars(&self) -> &[Tensor] {
        &self.vars
    }

    pub fn into_vars(self) -> Vec<Tensor> {
        self.vars
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Checks that `vars` has the same layout as this snapshot.
    ///
    /// # Arguments
    /// * `vars` - The variables to check.
    ///
    /// # Returns
    /// `DbErr::VarCountMismatch` or `DbErr::ShapeMismatch` on the first difference found.
    pub fn check_layout(&self, vars: &[Tensor]) -> Result<()> {
        if vars.len() != self.vars.len() {
            return Err(DbErr::VarCountMismatch {
                got: vars.len(),
                expected: self.vars.len(),
            });
        }

        for (index, (var, expected)) in vars.iter().zip(&self.vars).enumerate() {
            if var.shape() != expected.shape() {
                return Err(DbErr::ShapeMismatch {
                    index,
                    got: var.shape().to_vec(),
                    expected: expected.shape().to_vec(),
                });
            }
        }

        Ok(())
    }

    pub fn decode(record: SnapshotRecord) -> Result<Self> {
        let vars = record
            .vars
            .into_iter()
            .map(Tensor::decode)
            .collect::<Result<_>>()?;

        Ok(Self { vars })
    }

    pub fn encode(&self) -> SnapshotRecord {
        SnapshotRecord {
            vars: self.vars.iter().map(Tensor::encode).collect(),
        }
    }
}

/// One client's weighted contribution towards the next snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRecord {
    num_examples: u64,
    vars: Vec<Tensor>,
}

impl UpdateRecord {
    /// Creates a new `UpdateRecord`.
    ///
    /// # Arguments
    /// * `num_examples` - The amount of examples the client trained on, used as the update's weight.
    /// * `vars` - The per variable contributions, shaped like the snapshot's variables.
    ///
    /// # Returns
    /// A new `UpdateRecord` instance.
    pub fn new(num_examples: u64, vars: Vec<Tensor>) -> Self {
        Self { num_examples, vars }
    }

    pub fn num_examples(&self) -> u64 {
        self.num_examples
    }

    pub fn vars(&self) -> &[Tensor] {
        &self.vars
    }

    pub fn decode(entry: UpdateEntry) -> Result<Self> {
        let vars = entry
            .vars
            .into_iter()
            .map(Tensor::decode)
            .collect::<Result<_>>()?;

        Ok(Self {
            num_examples: entry.num_examples,
            vars,
        })
    }

    pub fn encode(&self) -> UpdateEntry {
        UpdateEntry {
            num_examples: self.num_examples,
            vars: self.vars.iter().map(Tensor::encode).collect(),
        }
    }
}
