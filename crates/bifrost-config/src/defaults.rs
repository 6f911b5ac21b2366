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

/// The signer retries its stored items every `1_000`ms by default.
pub const fn signer_retry_interval() -> u64 {
    1_000
}
/// Items older than `150` home blocks past their signing period are dropped.
pub const fn reschedule_buffer_blocks() -> i64 {
    150
}
/// Signed outbounds are observed by the signer itself by default.
pub const fn auto_observe() -> bool {
    true
}
/// A keysign is abandoned after five minutes.
pub const fn keysign_timeout() -> u64 {
    5 * 60 * 1_000
}
/// A keygen is abandoned after five minutes.
pub const fn keygen_timeout() -> u64 {
    5 * 60 * 1_000
}
/// Default capacity of the observer's signed-tx cache.
pub const fn mempool_tx_id_cache_size() -> usize {
    10_000
}
/// Default HTTP timeout used by the block scanners.
pub const fn http_request_timeout() -> u64 {
    30_000
}
/// Default number of retries of a failed HTTP request.
pub const fn max_http_request_retry() -> u32 {
    10
}
/// Sleep between two polls of the chain tip.
pub const fn block_height_discover_back_off() -> u64 {
    5_000
}
/// Sleep after a failed block fetch.
pub const fn block_retry_interval() -> u64 {
    10_000
}
/// Blocks between two solvency reports.
pub const fn solvency_blocks() -> i64 {
    100
}
/// The metrics server listens on `9000` by default.
pub const fn metrics_listen_port() -> u16 {
    9000
}
/// Metrics are enabled by default.
pub const fn metrics_enabled() -> bool {
    true
}
/// Default back-off initial interval.
pub const fn back_off_initial_interval() -> u64 {
    500
}
/// Default back-off randomization factor.
pub const fn back_off_randomization_factor() -> f64 {
    0.5
}
/// Default back-off multiplier.
pub const fn back_off_multiplier() -> f64 {
    1.5
}
/// Default back-off maximum interval.
pub const fn back_off_max_interval() -> u64 {
    3 * 60 * 1_000
}
/// Default back-off total budget.
pub const fn back_off_max_elapsed_time() -> u64 {
    168 * 60 * 60 * 1_000
}
/// Default TSS engine endpoint.
pub fn tss_host() -> String {
    String::from("http://127.0.0.1:6040")
}
/// Default home-chain REST endpoint.
pub fn thorchain_host() -> String {
    String::from("http://127.0.0.1:1317")
}
/// Default home-chain id.
pub fn thorchain_chain_id() -> String {
    String::from("thorchain")
}
