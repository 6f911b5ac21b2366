// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::primitives::{PubKey, TxId};

/// Name of the last TSS keysign round.
///
/// A failure at this round means some peers may already hold a valid
/// signature.
pub const KEYSIGN_ROUND_7: &str = "SignRound7Message";

/// The kind of vault a keygen produces.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum KeygenType {
    /// Unrecognised keygen.
    #[default]
    #[serde(rename = "UnknownKeygen", alias = "unknownKeygen")]
    Unknown,
    /// Multi-party asgard vault.
    #[serde(rename = "AsgardKeygen", alias = "asgardKeygen")]
    Asgard,
    /// Single signer yggdrasil vault.
    #[serde(rename = "YggdrasilKeygen", alias = "yggdrasilKeygen")]
    Yggdrasil,
}

impl fmt::Display for KeygenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeygenType::Unknown => "UnknownKeygen",
            KeygenType::Asgard => "AsgardKeygen",
            KeygenType::Yggdrasil => "YggdrasilKeygen",
        };
        f.write_str(s)
    }
}

/// A single keygen request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keygen {
    /// Keygen id.
    #[serde(default)]
    pub id: String,
    /// Vault kind.
    #[serde(rename = "type", default)]
    pub keygen_type: KeygenType,
    /// Participating node pubkeys.
    #[serde(default)]
    pub members: Vec<PubKey>,
}

impl Keygen {
    /// Builds a keygen whose id is derived from the height, type and
    /// sorted members.
    pub fn new(
        height: i64,
        mut members: Vec<PubKey>,
        keygen_type: KeygenType,
    ) -> Self {
        members.sort();
        let mut data = format!("{height}{keygen_type}");
        for m in &members {
            data.push_str(m.as_str());
        }
        let id = crate::sha256_upper_hex(data.as_bytes());
        Self {
            id,
            keygen_type,
            members,
        }
    }

    /// Whether there is nothing to generate.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty() || self.id.is_empty()
    }
}

/// Keygens requested by the home chain at one height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeygenBlock {
    /// Home-chain height.
    #[serde(default)]
    pub height: i64,
    /// The requests.
    #[serde(default)]
    pub keygens: Vec<Keygen>,
}

impl KeygenBlock {
    /// Whether the block carries no keygen.
    pub fn is_empty(&self) -> bool {
        self.keygens.is_empty() && self.height <= 0
    }

    /// Whether a keygen with the same id is already present.
    pub fn contains(&self, keygen: &Keygen) -> bool {
        self.keygens
            .iter()
            .any(|k| k.id.eq_ignore_ascii_case(&keygen.id))
    }
}

/// A node blamed for a failed TSS ceremony.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameNode {
    /// Blamed node.
    #[serde(default)]
    pub pubkey: PubKey,
    /// Evidence.
    #[serde(default, with = "hex_bytes")]
    pub blame_data: Vec<u8>,
    /// Signature over the evidence.
    #[serde(default, with = "hex_bytes")]
    pub blame_signature: Vec<u8>,
}

/// The result of a failed TSS ceremony.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blame {
    /// Human readable reason.
    #[serde(default)]
    pub fail_reason: String,
    /// Whether the failure happened in a unicast round.
    #[serde(default)]
    pub is_unicast: bool,
    /// Round the ceremony failed in.
    #[serde(default)]
    pub round: String,
    /// Blamed nodes.
    #[serde(default)]
    pub blame_nodes: Vec<BlameNode>,
}

impl Blame {
    /// Whether nobody was blamed and no reason was given.
    pub fn is_empty(&self) -> bool {
        self.fail_reason.is_empty() && self.blame_nodes.is_empty()
    }

    /// Pubkeys of the blamed nodes.
    pub fn blamed_pubkeys(&self) -> Vec<PubKey> {
        self.blame_nodes.iter().map(|n| n.pubkey.clone()).collect()
    }
}

impl fmt::Display for Blame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<&str> =
            self.blame_nodes.iter().map(|n| n.pubkey.as_str()).collect();
        write!(
            f,
            "reason: {}, round: {}, nodes: [{}]",
            self.fail_reason,
            self.round,
            nodes.join(", ")
        )
    }
}

/// A keysign failed, carrying the blame reported by the TSS engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("fail to keysign: {blame}")]
pub struct KeysignError {
    /// The blame.
    pub blame: Blame,
}

impl KeysignError {
    /// Wraps a blame.
    pub fn new(blame: Blame) -> Self {
        Self { blame }
    }

    /// Whether the ceremony failed at the last round.
    pub fn round7(&self) -> bool {
        self.blame.round == KEYSIGN_ROUND_7
    }
}

/// Identifies one keysign ceremony for failure reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignFailure {
    /// Vault that attempted to sign.
    pub pub_key: PubKey,
    /// Home-chain height of the outbound.
    pub height: i64,
    /// Outbound memo.
    pub memo: String,
    /// Outbound coins.
    pub coins: crate::Coins,
    /// The blame.
    pub blame: Blame,
}

impl KeysignFailure {
    /// A stable id for voting on the failure.
    pub fn id(&self) -> TxId {
        let data = format!(
            "{}|{}|{}|{}",
            self.height, self.pub_key, self.memo, self.coins
        );
        TxId::new(&crate::sha256_upper_hex(data.as_bytes()))
            .unwrap_or_default()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round7_detection() {
        let err = KeysignError::new(Blame {
            round: KEYSIGN_ROUND_7.into(),
            ..Default::default()
        });
        assert!(err.round7());
        let err = KeysignError::new(Blame {
            round: "SignRound6Message".into(),
            ..Default::default()
        });
        assert!(!err.round7());
    }

    #[test]
    fn keygen_id_ignores_member_order() {
        let a = Keygen::new(
            10,
            vec![PubKey::new("b"), PubKey::new("a")],
            KeygenType::Asgard,
        );
        let b = Keygen::new(
            10,
            vec![PubKey::new("a"), PubKey::new("b")],
            KeygenType::Asgard,
        );
        assert_eq!(a.id, b.id);
        assert_eq!(a.members[0].as_str(), "a");
        let block = KeygenBlock {
            height: 10,
            keygens: vec![a],
        };
        assert!(block.contains(&b));
    }

    #[test]
    fn keygen_type_json() {
        let k: Keygen = serde_json::from_str(
            r#"{"id":"x","type":"asgardKeygen","members":["thorpub1a"]}"#,
        )
        .unwrap();
        assert_eq!(k.keygen_type, KeygenType::Asgard);
        let v = serde_json::to_value(&k).unwrap();
        assert_eq!(v["type"], "AsgardKeygen");
    }
}
