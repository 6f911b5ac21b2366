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
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::asset::Asset;

/// An amount of one asset. Amounts are integers in the asset's smallest
/// unit (1e8 for every asset as seen by the home chain).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    /// The asset.
    pub asset: Asset,
    /// The amount, serialised as a decimal string.
    #[serde(with = "amount")]
    pub amount: u128,
    /// Native decimals of the asset, when they differ from 8.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub decimals: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Coin {
    /// Creates a coin with default decimals.
    pub fn new(asset: Asset, amount: u128) -> Self {
        Self {
            asset,
            amount,
            decimals: 0,
        }
    }

    /// A coin is empty when it has no asset or no amount.
    pub fn is_empty(&self) -> bool {
        self.asset.is_empty() || self.amount == 0
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.asset)
    }
}

/// A list of coins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coins(pub Vec<Coin>);

/// Gas paid by a transaction.
pub type Gas = Coins;

impl Coins {
    /// Creates a list from the given coins.
    pub fn new(coins: Vec<Coin>) -> Self {
        Self(coins)
    }

    /// True if there are no coins, or every coin is empty.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Coin::is_empty)
    }

    /// Looks up the coin of the given asset.
    pub fn get(&self, asset: &Asset) -> Option<&Coin> {
        self.0.iter().find(|c| &c.asset == asset)
    }

    /// Order-insensitive equality on `(asset, amount)`.
    pub fn equals_ex(&self, other: &Coins) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0.iter().all(|c| {
            other
                .0
                .iter()
                .any(|o| o.asset == c.asset && o.amount == c.amount)
        })
    }
}

impl Deref for Coins {
    type Target = Vec<Coin>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Coins {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<Coin>> for Coins {
    fn from(coins: Vec<Coin>) -> Self {
        Self(coins)
    }
}

impl FromIterator<Coin> for Coins {
    fn from_iter<T: IntoIterator<Item = Coin>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Coins {
    type Item = Coin;
    type IntoIter = std::vec::IntoIter<Coin>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Coin::to_string).collect();
        f.write_str(&parts.join(", "))
    }
}

/// Serde helpers for `u128` amounts carried as decimal strings.
///
/// Plain JSON numbers are accepted on input as well.
pub mod amount {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    /// Serialises the amount as a decimal string.
    pub fn serialize<S: Serializer>(
        value: &u128,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    /// Deserialises a decimal string or integer.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<u128, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }

    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = u128;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an unsigned integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
            Ok(u128::from(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
            u128::try_from(v).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
            if v.is_empty() {
                return Ok(0);
            }
            v.parse::<u128>().map_err(E::custom)
        }
    }

    /// Same as the parent module for optional amounts.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialises `Some` as a decimal string.
        pub fn serialize<S: Serializer>(
            value: &Option<u128>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_str(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialises an optional decimal string.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u128>, D::Error> {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] u128);
            let v: Option<Wrapper> = Option::deserialize(deserializer)?;
            Ok(v.map(|Wrapper(a)| a))
        }
    }
}
