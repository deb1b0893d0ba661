//! Core types for the ledger
//!
//! All types are designed for:
//! - Exact arithmetic (Decimal for money)
//! - Direct row mapping (sqlx `FromRow`)
//! - camelCase JSON on the wire

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Wallet record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    /// Wallet ID, immutable
    pub id: Uuid,

    /// Current balance, never negative
    pub balance: Decimal,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last balance mutation or soft-delete
    pub updated_at: DateTime<Utc>,

    /// Soft-delete flag
    pub deleted: bool,
}

impl Wallet {
    /// Fresh wallet with zero balance
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Direction of a balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Adds to the balance
    Deposit,
    /// Subtracts from the balance
    Withdraw,
}

impl OperationType {
    /// Wire / column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Deposit => "DEPOSIT",
            OperationType::Withdraw => "WITHDRAW",
        }
    }

    /// Signed delta for `amount`
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            OperationType::Deposit => amount,
            OperationType::Withdraw => -amount,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(ValidationError::EmptyOperationType),
            "DEPOSIT" => Ok(OperationType::Deposit),
            "WITHDRAW" => Ok(OperationType::Withdraw),
            other => Err(ValidationError::UnknownOperationType(other.to_string())),
        }
    }
}

/// Immutable transaction log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Server-generated ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Wallet this entry belongs to
    pub wallet_id: Uuid,

    /// Strictly positive amount
    pub amount: Decimal,

    /// Direction of the change
    #[serde(rename = "transactionType")]
    pub operation_type: OperationType,

    /// Persistence time
    pub executed_at: DateTime<Utc>,
}

impl Transaction {
    /// Entry for a validated operation, stamped at `executed_at`
    pub fn record(operation: &Operation, executed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            wallet_id: operation.wallet_id(),
            amount: operation.amount(),
            operation_type: operation.operation_type(),
            executed_at,
        }
    }

    /// Signed contribution of this entry to the wallet balance
    pub fn signed_amount(&self) -> Decimal {
        self.operation_type.signed(self.amount)
    }
}

/// Raw operation as decoded from a request
///
/// Nothing here is trusted yet; [`OperationRequest::validate`] turns it into an [`Operation`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Client-supplied transaction ID, accepted but never used as the entry ID
    #[serde(default)]
    pub id: Option<Uuid>,

    /// Target wallet
    #[serde(default)]
    pub wallet_id: Uuid,

    /// Amount as sent
    #[serde(default)]
    pub amount: Decimal,

    /// DEPOSIT or WITHDRAW; may be omitted when the entry point fixes it
    #[serde(default, rename = "transactionType")]
    pub operation_type: Option<String>,
}

impl OperationRequest {
    /// Validate into an [`Operation`]
    ///
    /// `expected` is the type fixed by the entry point (e.g. a deposit endpoint).
    /// A request without a type takes it; a request with a different type is rejected.
    pub fn validate(&self, expected: Option<OperationType>) -> Result<Operation, ValidationError> {
        let operation_type = match (self.operation_type.as_deref(), expected) {
            (Some(raw), expected) => {
                let actual = raw.parse::<OperationType>()?;
                match expected {
                    Some(expected) if expected != actual => {
                        return Err(ValidationError::OperationTypeMismatch { expected, actual })
                    }
                    _ => actual,
                }
            }
            (None, Some(expected)) => expected,
            (None, None) => return Err(ValidationError::EmptyOperationType),
        };

        Operation::new(self.wallet_id, operation_type, self.amount)
    }
}

/// Validated balance-changing operation
///
/// Can only be built through [`Operation::new`], so holding one means the
/// wallet ID is set and the amount is positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    wallet_id: Uuid,
    operation_type: OperationType,
    amount: Decimal,
}

impl Operation {
    /// Check preconditions
    pub fn new(
        wallet_id: Uuid,
        operation_type: OperationType,
        amount: Decimal,
    ) -> Result<Self, ValidationError> {
        if wallet_id.is_nil() {
            return Err(ValidationError::EmptyWalletId);
        }

        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(amount));
        }

        Ok(Self {
            wallet_id,
            operation_type,
            amount,
        })
    }

    /// Target wallet
    pub fn wallet_id(&self) -> Uuid {
        self.wallet_id
    }

    /// Direction
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Unsigned amount
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// `+amount` for deposits, `-amount` for withdrawals
    pub fn delta(&self) -> Decimal {
        self.operation_type.signed(self.amount)
    }
}

/// Result of reconciling a wallet's stored balance against its log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceCheck {
    /// Wallet checked
    pub wallet_id: Uuid,
    /// Balance column
    pub stored_balance: Decimal,
    /// Σ deposits − Σ withdrawals
    pub computed_balance: Decimal,
    /// Number of log entries
    pub transaction_count: usize,
}

impl BalanceCheck {
    /// Stored and computed balances agree
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.computed_balance
    }
}
