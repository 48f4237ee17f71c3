//! Signed dice rolls.
//!
//! A roll produces evidence (the dice, the kept set, the total, the
//! formula) which the roller signs with their identity key. Any peer can
//! re-derive the canonical evidence bytes and audit the signature, so a
//! roll cannot be forged or altered after the fact.

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{IdentityKeypair, IdentityPublicKey, IdentitySignature, PeerId};
use crate::error::CoreError;
use crate::event::DiceRollBody;

/// Permitted dice count range.
pub const MIN_DICE_COUNT: u32 = 1;
pub const MAX_DICE_COUNT: u32 = 20;

/// Permitted dice sides range.
pub const MIN_DICE_SIDES: u32 = 2;
pub const MAX_DICE_SIDES: u32 = 1000;

/// Permitted modifier magnitude.
pub const MAX_MODIFIER: i32 = 1000;

/// Roll mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiceMode {
    Normal,
    /// Each die is rolled twice, keeping the higher.
    Advantage,
    /// Each die is rolled twice, keeping the lower.
    Disadvantage,
}

/// One rolled die. Dropped advantage/disadvantage candidates stay in the
/// evidence with `kept = false` so auditors can recheck the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DieComponent {
    pub value: u32,
    pub kept: bool,
}

/// The auditable record of a dice roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiceRollEvidence {
    pub roll_id: Uuid,
    pub roller_peer_id: PeerId,
    pub roller_device_name: String,
    /// Roller's Ed25519 identity public key, base64.
    pub roller_public_key: String,
    pub dice_count: u32,
    pub dice_sides: u32,
    pub modifier: i32,
    pub mode: DiceMode,
    pub components: Vec<DieComponent>,
    pub total: i64,
    /// Canonical human-readable formula, e.g. `2d20+3 (advantage)`.
    pub formula: String,
    /// Unix ms.
    pub rolled_at: i64,
}

impl DiceRollEvidence {
    /// Canonical bytes signed by the roller: compact camelCase JSON of the
    /// evidence itself.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self).map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    /// Sign the evidence with the roller's identity key.
    pub fn sign(&self, keypair: &IdentityKeypair) -> Result<IdentitySignature, CoreError> {
        Ok(keypair.sign(&self.canonical_bytes()?))
    }

    /// Audit a signature (base64) against this evidence.
    ///
    /// Returns false on any parse or verification failure; a bad key or a
    /// mangled signature is an invalid roll, not an error.
    pub fn verify(&self, signature_b64: &str) -> bool {
        let Ok(public_key) = IdentityPublicKey::from_base64(&self.roller_public_key) else {
            return false;
        };
        let Ok(signature) = IdentitySignature::from_base64(signature_b64) else {
            return false;
        };
        let Ok(bytes) = self.canonical_bytes() else {
            return false;
        };
        public_key.verify(&bytes, &signature).is_ok()
    }
}

/// Check a formula against the permitted bounds.
pub fn validate_formula(dice_count: u32, dice_sides: u32, modifier: i32) -> Result<(), CoreError> {
    if dice_count == 0 {
        return Err(CoreError::FormulaInvalid("dice count must be positive".into()));
    }
    if dice_sides < MIN_DICE_SIDES {
        return Err(CoreError::FormulaInvalid(format!(
            "dice must have at least {MIN_DICE_SIDES} sides"
        )));
    }
    if dice_count > MAX_DICE_COUNT {
        return Err(CoreError::FormulaOutOfRange(format!(
            "dice count {dice_count} exceeds {MAX_DICE_COUNT}"
        )));
    }
    if dice_sides > MAX_DICE_SIDES {
        return Err(CoreError::FormulaOutOfRange(format!(
            "dice sides {dice_sides} exceeds {MAX_DICE_SIDES}"
        )));
    }
    if modifier.abs() > MAX_MODIFIER {
        return Err(CoreError::FormulaOutOfRange(format!(
            "modifier {modifier} exceeds +/-{MAX_MODIFIER}"
        )));
    }
    Ok(())
}

/// Render the canonical formula string.
fn render_formula(dice_count: u32, dice_sides: u32, modifier: i32, mode: DiceMode) -> String {
    let mut formula = format!("{dice_count}d{dice_sides}");
    if modifier != 0 {
        formula.push_str(&format!("{modifier:+}"));
    }
    match mode {
        DiceMode::Normal => {}
        DiceMode::Advantage => formula.push_str(" (advantage)"),
        DiceMode::Disadvantage => formula.push_str(" (disadvantage)"),
    }
    formula
}

/// Roll dice and produce signed evidence wrapped in an event body.
pub fn roll_signed<R: Rng>(
    rng: &mut R,
    keypair: &IdentityKeypair,
    device_name: &str,
    dice_count: u32,
    dice_sides: u32,
    modifier: i32,
    mode: DiceMode,
    rolled_at: i64,
) -> Result<DiceRollBody, CoreError> {
    validate_formula(dice_count, dice_sides, modifier)?;

    let mut components = Vec::new();
    let mut total: i64 = 0;
    for _ in 0..dice_count {
        match mode {
            DiceMode::Normal => {
                let value = rng.gen_range(1..=dice_sides);
                components.push(DieComponent { value, kept: true });
                total += i64::from(value);
            }
            DiceMode::Advantage | DiceMode::Disadvantage => {
                let first = rng.gen_range(1..=dice_sides);
                let second = rng.gen_range(1..=dice_sides);
                let keep_first = if mode == DiceMode::Advantage {
                    first >= second
                } else {
                    first <= second
                };
                components.push(DieComponent {
                    value: first,
                    kept: keep_first,
                });
                components.push(DieComponent {
                    value: second,
                    kept: !keep_first,
                });
                total += i64::from(if keep_first { first } else { second });
            }
        }
    }
    total += i64::from(modifier);

    let evidence = DiceRollEvidence {
        roll_id: Uuid::new_v4(),
        roller_peer_id: keypair.peer_id(),
        roller_device_name: device_name.to_string(),
        roller_public_key: keypair.public_key().to_base64(),
        dice_count,
        dice_sides,
        modifier,
        mode,
        components,
        total,
        formula: render_formula(dice_count, dice_sides, modifier, mode),
        rolled_at,
    };
    let signature = evidence.sign(keypair)?.to_base64();

    Ok(DiceRollBody {
        evidence,
        signature,
    })
}
