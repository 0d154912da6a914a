//! Helper contracts: embedded ABIs, deployment records, and receipt event
//! inspection. Bytecode is never embedded; it comes from configuration.

use crate::rpc::ReceiptInfo;
use ethers::abi::{self, RawLog, Token};
use ethers::types::{Address, Log, U64};
use serde::Serialize;
use std::fmt;
use tracing::warn;

pub const DISTRIBUTOR_ABI: &str = r#"[
    {"type":"constructor","stateMutability":"nonpayable","inputs":[]},
    {"type":"function","name":"distribute","stateMutability":"payable","inputs":[{"name":"recipient","type":"address"}],"outputs":[]},
    {"type":"function","name":"distributeWithRelay","stateMutability":"payable","inputs":[{"name":"recipient","type":"address"}],"outputs":[]},
    {"type":"function","name":"setRelayContract","stateMutability":"nonpayable","inputs":[{"name":"relay","type":"address"}],"outputs":[]},
    {"type":"function","name":"relayContract","stateMutability":"view","inputs":[],"outputs":[{"name":"","type":"address"}]},
    {"type":"function","name":"owner","stateMutability":"view","inputs":[],"outputs":[{"name":"","type":"address"}]},
    {"type":"event","name":"Forwarded","anonymous":false,"inputs":[{"name":"success","type":"bool","indexed":false}]},
    {"type":"event","name":"RelaySet","anonymous":false,"inputs":[{"name":"relay","type":"address","indexed":false}]},
    {"type":"event","name":"SentToRelay","anonymous":false,"inputs":[{"name":"success","type":"bool","indexed":false}]}
]"#;

pub const RELAY_ABI: &str = r#"[
    {"type":"constructor","stateMutability":"nonpayable","inputs":[]},
    {"type":"function","name":"forward","stateMutability":"nonpayable","inputs":[{"name":"to","type":"address"}],"outputs":[]},
    {"type":"receive","stateMutability":"payable"},
    {"type":"event","name":"Forwarded","anonymous":false,"inputs":[{"name":"success","type":"bool","indexed":false}]}
]"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ContractKind {
    Distributor,
    Relay,
}

impl ContractKind {
    pub fn abi_json(&self) -> &'static str {
        match self {
            ContractKind::Distributor => DISTRIBUTOR_ABI,
            ContractKind::Relay => RELAY_ABI,
        }
    }

    pub fn abi(&self) -> Result<abi::Abi, serde_json::Error> {
        serde_json::from_str(self.abi_json())
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractKind::Distributor => write!(f, "Distributor"),
            ContractKind::Relay => write!(f, "Relay"),
        }
    }
}

/// A confirmed deployment. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedContract {
    pub address: Address,
    pub kind: ContractKind,
    pub deployer: Address,
    pub confirmed_block: Option<U64>,
}

/// Outcome carried by a `Forwarded` / `SentToRelay` / `RelaySet` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEvent {
    Forwarded(bool),
    SentToRelay(bool),
    RelaySet(Address),
}

fn decode_log(abi: &abi::Abi, log: &Log) -> Option<ContractEvent> {
    let topic0 = log.topics.first()?;
    let event = abi.events().find(|e| e.signature() == *topic0)?;
    let parsed = event
        .parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        })
        .ok()?;
    let value = parsed.params.into_iter().next()?.value;

    match (event.name.as_str(), value) {
        ("Forwarded", Token::Bool(ok)) => Some(ContractEvent::Forwarded(ok)),
        ("SentToRelay", Token::Bool(ok)) => Some(ContractEvent::SentToRelay(ok)),
        ("RelaySet", Token::Address(relay)) => Some(ContractEvent::RelaySet(relay)),
        _ => None,
    }
}

/// Every helper-contract event found in the receipt, in log order.
pub fn receipt_events(receipt: &ReceiptInfo) -> Vec<ContractEvent> {
    let abi = match ContractKind::Distributor.abi() {
        Ok(abi) => abi,
        Err(e) => {
            warn!("Distributor ABI failed to parse: {}", e);
            return Vec::new();
        }
    };

    receipt
        .logs
        .iter()
        .filter_map(|log| decode_log(&abi, log))
        .collect()
}

/// `Some(reason)` if a forwarding event explicitly reported failure.
/// No events at all is not a failure.
pub fn forwarding_failure(receipt: &ReceiptInfo) -> Option<String> {
    receipt_events(receipt).into_iter().find_map(|e| match e {
        ContractEvent::Forwarded(false) => Some("Forwarded(false) emitted".to_string()),
        ContractEvent::SentToRelay(false) => Some("SentToRelay(false) emitted".to_string()),
        _ => None,
    })
}

pub fn relay_set_to(receipt: &ReceiptInfo) -> Option<Address> {
    receipt_events(receipt).into_iter().find_map(|e| match e {
        ContractEvent::RelaySet(relay) => Some(relay),
        _ => None,
    })
}

/// Builds the log a Distributor would emit; used by mocks and tests.
pub fn encode_event_log(emitter: Address, event: &ContractEvent) -> Log {
    let (signature, data) = match event {
        ContractEvent::Forwarded(ok) => ("Forwarded(bool)", abi::encode(&[Token::Bool(*ok)])),
        ContractEvent::SentToRelay(ok) => {
            ("SentToRelay(bool)", abi::encode(&[Token::Bool(*ok)]))
        }
        ContractEvent::RelaySet(relay) => {
            ("RelaySet(address)", abi::encode(&[Token::Address(*relay)]))
        }
    };

    Log {
        address: emitter,
        topics: vec![ethers::utils::keccak256(signature).into()],
        data: data.into(),
        ..Default::default()
    }
}
