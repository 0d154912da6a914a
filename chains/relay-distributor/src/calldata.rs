//! Hand-assembled ABI calldata.
//!
//! Every parameter is laid out as one or more 32-byte words: numbers and
//! addresses left-padded, byte payloads right-padded, dynamic values behind
//! an offset in the head. Selectors are the first four bytes of the
//! keccak256 of the canonical signature.
//!
//! Builders at the bottom of this file fix the slot order for each target
//! contract. A signature change means touching the builder, not the
//! primitives.

use crate::error::EncodingError;
use ethers::types::{Address, I256, U256};

pub type Word = [u8; 32];

pub const WORD: usize = 32;

pub const SIG_TRANSFER: &str = "transfer(address,uint256)";
pub const SIG_APPROVE: &str = "approve(address,uint256)";
pub const SIG_BALANCE_OF: &str = "balanceOf(address)";
pub const SIG_ALLOWANCE: &str = "allowance(address,address)";
pub const SIG_MULTICALL: &str = "multicall(uint256,bytes[])";
pub const SIG_EXACT_INPUT_SINGLE: &str =
    "exactInputSingle((address,address,uint24,address,uint256,uint256,uint160))";
pub const SIG_ADD_LIQUIDITY: &str =
    "addLiquidity(address,address,uint256,uint256,uint256,uint256,address,uint256)";
pub const SIG_DISTRIBUTE: &str = "distribute(address)";
pub const SIG_DISTRIBUTE_WITH_RELAY: &str = "distributeWithRelay(address)";
pub const SIG_SET_RELAY_CONTRACT: &str = "setRelayContract(address)";
pub const SIG_FORWARD: &str = "forward(address)";

pub fn selector(signature: &str) -> [u8; 4] {
    ethers::utils::id(signature)
}

// --- Primitives ---

pub fn encode_uint256(value: U256) -> Word {
    let mut word = [0u8; WORD];
    value.to_big_endian(&mut word);
    word
}

/// Big-endian magnitude of any length. Leading zero bytes are ignored; more
/// than 32 significant bytes is an overflow.
pub fn encode_uint256_be(magnitude: &[u8]) -> Result<Word, EncodingError> {
    let first = magnitude
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(magnitude.len());
    let significant = &magnitude[first..];

    if significant.len() > WORD {
        return Err(EncodingError::Overflow {
            value: format!("0x{}", hex::encode(significant)),
        });
    }

    let mut word = [0u8; WORD];
    word[WORD - significant.len()..].copy_from_slice(significant);
    Ok(word)
}

pub fn encode_uint256_dec(value: &str) -> Result<Word, EncodingError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EncodingError::InvalidNumber {
            input: value.to_string(),
        });
    }

    U256::from_dec_str(trimmed)
        .map(encode_uint256)
        .map_err(|_| EncodingError::Overflow {
            value: trimmed.to_string(),
        })
}

pub fn decode_uint256(word: &Word) -> U256 {
    U256::from_big_endian(word)
}

/// Two's complement; negative values come out sign-extended with 0xFF.
pub fn encode_int256(value: I256) -> Word {
    encode_uint256(value.into_raw())
}

pub fn encode_int256_dec(value: &str) -> Result<Word, EncodingError> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EncodingError::InvalidNumber {
            input: value.to_string(),
        });
    }

    I256::from_dec_str(trimmed)
        .map(encode_int256)
        .map_err(|_| EncodingError::Overflow {
            value: trimmed.to_string(),
        })
}

pub fn decode_int256(word: &Word) -> I256 {
    I256::from_raw(decode_uint256(word))
}

pub fn parse_address(input: &str) -> Result<Address, EncodingError> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let bytes = hex::decode(body).map_err(|_| EncodingError::InvalidHex {
        input: input.to_string(),
    })?;

    if bytes.len() != 20 {
        return Err(EncodingError::WrongLength {
            expected: 20,
            actual: bytes.len(),
        });
    }

    Ok(Address::from_slice(&bytes))
}

/// 12 zero bytes followed by the 20 address bytes.
pub fn address_word(address: Address) -> Word {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

pub fn encode_address(input: &str) -> Result<Word, EncodingError> {
    parse_address(input).map(address_word)
}

/// Length word followed by the payload, right-padded to a word boundary.
pub fn encode_bytes(data: &[u8]) -> Vec<Word> {
    let mut words = Vec::with_capacity(1 + data.len().div_ceil(WORD));
    words.push(encode_uint256(U256::from(data.len())));

    for chunk in data.chunks(WORD) {
        let mut word = [0u8; WORD];
        word[..chunk.len()].copy_from_slice(chunk);
        words.push(word);
    }

    words
}

/// `bytes[]` body: element count, one offset per element (relative to the
/// first offset slot), then each element as length-prefixed bytes.
pub fn encode_dynamic_bytes_array(items: &[Vec<u8>]) -> Vec<Word> {
    let mut offsets = Vec::with_capacity(items.len());
    let mut tails = Vec::new();
    let mut cursor = items.len() * WORD;

    for item in items {
        offsets.push(encode_uint256(U256::from(cursor)));
        let encoded = encode_bytes(item);
        cursor += encoded.len() * WORD;
        tails.extend(encoded);
    }

    let mut words = Vec::with_capacity(1 + offsets.len() + tails.len());
    words.push(encode_uint256(U256::from(items.len())));
    words.extend(offsets);
    words.extend(tails);
    words
}

/// One top-level parameter of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiParam {
    /// Any static 32-byte value (uint, int, address, bool, static tuple member)
    Word(Word),
    Bytes(Vec<u8>),
    BytesArray(Vec<Vec<u8>>),
}

impl AbiParam {
    pub fn uint(value: U256) -> Self {
        AbiParam::Word(encode_uint256(value))
    }

    pub fn address(address: Address) -> Self {
        AbiParam::Word(address_word(address))
    }
}

/// Standard head/tail layout: static words inline, dynamic values as an
/// offset (from the start of the parameter block) into the tail.
pub fn encode_params(params: &[AbiParam]) -> Vec<Word> {
    let mut head = Vec::with_capacity(params.len());
    let mut tail: Vec<Word> = Vec::new();
    let head_size = params.len() * WORD;

    for param in params {
        match param {
            AbiParam::Word(word) => head.push(*word),
            AbiParam::Bytes(data) => {
                head.push(encode_uint256(U256::from(head_size + tail.len() * WORD)));
                tail.extend(encode_bytes(data));
            }
            AbiParam::BytesArray(items) => {
                head.push(encode_uint256(U256::from(head_size + tail.len() * WORD)));
                tail.extend(encode_dynamic_bytes_array(items));
            }
        }
    }

    head.extend(tail);
    head
}

/// Selector plus 32-byte parameter slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalldataFrame {
    selector: [u8; 4],
    slots: Vec<Word>,
}

impl CalldataFrame {
    pub fn new(signature: &str, params: &[AbiParam]) -> Self {
        Self {
            selector: selector(signature),
            slots: encode_params(params),
        }
    }

    pub fn selector(&self) -> [u8; 4] {
        self.selector
    }

    pub fn slots(&self) -> &[Word] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        4 + self.slots.len() * WORD
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.selector);
        for slot in &self.slots {
            out.extend_from_slice(slot);
        }
        out
    }
}

impl From<CalldataFrame> for ethers::types::Bytes {
    fn from(frame: CalldataFrame) -> Self {
        frame.to_bytes().into()
    }
}

/// First word of an `eth_call` return as uint256.
pub fn decode_uint256_return(data: &[u8]) -> Result<U256, EncodingError> {
    if data.len() < WORD {
        return Err(EncodingError::WrongLength {
            expected: WORD,
            actual: data.len(),
        });
    }
    Ok(U256::from_big_endian(&data[..WORD]))
}

// --- Builders ---

/// Single-pool exact-input swap (SwapRouter02 struct, no deadline field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapParams {
    pub token_in: Address,
    pub token_out: Address,
    pub fee_tier: u32,
    pub recipient: Address,
    pub amount_in: U256,
    pub amount_out_minimum: U256,
    pub sqrt_price_limit_x96: U256,
}

pub fn build_swap_calldata(params: &SwapParams) -> Result<CalldataFrame, EncodingError> {
    if params.fee_tier >= 1 << 24 {
        return Err(EncodingError::Overflow {
            value: params.fee_tier.to_string(),
        });
    }
    if params.sqrt_price_limit_x96.bits() > 160 {
        return Err(EncodingError::Overflow {
            value: params.sqrt_price_limit_x96.to_string(),
        });
    }

    // static tuple: members are inlined in declaration order
    Ok(CalldataFrame::new(
        SIG_EXACT_INPUT_SINGLE,
        &[
            AbiParam::address(params.token_in),
            AbiParam::address(params.token_out),
            AbiParam::uint(U256::from(params.fee_tier)),
            AbiParam::address(params.recipient),
            AbiParam::uint(params.amount_in),
            AbiParam::uint(params.amount_out_minimum),
            AbiParam::uint(params.sqrt_price_limit_x96),
        ],
    ))
}

pub fn build_multicall_calldata(deadline: U256, calls: &[Vec<u8>]) -> CalldataFrame {
    CalldataFrame::new(
        SIG_MULTICALL,
        &[AbiParam::uint(deadline), AbiParam::BytesArray(calls.to_vec())],
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddLiquidityParams {
    pub token_a: Address,
    pub token_b: Address,
    pub amount_a_desired: U256,
    pub amount_b_desired: U256,
    pub amount_a_min: U256,
    pub amount_b_min: U256,
    pub to: Address,
    pub deadline: U256,
}

pub fn build_add_liquidity_calldata(params: &AddLiquidityParams) -> CalldataFrame {
    CalldataFrame::new(
        SIG_ADD_LIQUIDITY,
        &[
            AbiParam::address(params.token_a),
            AbiParam::address(params.token_b),
            AbiParam::uint(params.amount_a_desired),
            AbiParam::uint(params.amount_b_desired),
            AbiParam::uint(params.amount_a_min),
            AbiParam::uint(params.amount_b_min),
            AbiParam::address(params.to),
            AbiParam::uint(params.deadline),
        ],
    )
}

pub fn build_distribute_calldata(recipient: Address) -> CalldataFrame {
    CalldataFrame::new(SIG_DISTRIBUTE, &[AbiParam::address(recipient)])
}

pub fn build_distribute_with_relay_calldata(recipient: Address) -> CalldataFrame {
    CalldataFrame::new(SIG_DISTRIBUTE_WITH_RELAY, &[AbiParam::address(recipient)])
}

pub fn build_set_relay_contract_calldata(relay: Address) -> CalldataFrame {
    CalldataFrame::new(SIG_SET_RELAY_CONTRACT, &[AbiParam::address(relay)])
}

pub fn build_forward_calldata(to: Address) -> CalldataFrame {
    CalldataFrame::new(SIG_FORWARD, &[AbiParam::address(to)])
}

pub fn build_approve_calldata(spender: Address, amount: U256) -> CalldataFrame {
    CalldataFrame::new(
        SIG_APPROVE,
        &[AbiParam::address(spender), AbiParam::uint(amount)],
    )
}

pub fn build_transfer_calldata(to: Address, amount: U256) -> CalldataFrame {
    CalldataFrame::new(SIG_TRANSFER, &[AbiParam::address(to), AbiParam::uint(amount)])
}

pub fn build_balance_of_calldata(owner: Address) -> CalldataFrame {
    CalldataFrame::new(SIG_BALANCE_OF, &[AbiParam::address(owner)])
}

pub fn build_allowance_calldata(owner: Address, spender: Address) -> CalldataFrame {
    CalldataFrame::new(
        SIG_ALLOWANCE,
        &[AbiParam::address(owner), AbiParam::address(spender)],
    )
}
