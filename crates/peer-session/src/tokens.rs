//! Tokenization and piece conversion against a loaded model.

use peer_engine::{EngineError, Model, TokenId, TokenizeOutcome};

/// Bytes available for one token's text.
pub(crate) const PIECE_BUFFER_LEN: usize = 512;

/// Tokenize with special tokens added and parsed.
///
/// The first attempt uses a buffer of `text.len() + 8` tokens. If the runtime
/// reports the exact capacity it needs, one more attempt is made at that size.
pub(crate) fn tokenize(model: &dyn Model, text: &str) -> Result<Vec<TokenId>, EngineError> {
    let mut tokens = vec![0; text.len() + 8];
    let required = match model.tokenize(text, &mut tokens, true, true)? {
        TokenizeOutcome::Written(n) => {
            tokens.truncate(n);
            return Ok(tokens);
        }
        TokenizeOutcome::Undersized { required } => required,
    };

    if !model.reports_required_capacity() || required == 0 {
        return Err(EngineError::Tokenization(format!(
            "buffer of {} tokens too small and no size reported",
            tokens.len()
        )));
    }

    tokens.resize(required, 0);
    match model.tokenize(text, &mut tokens, true, true)? {
        TokenizeOutcome::Written(n) => {
            tokens.truncate(n);
            Ok(tokens)
        }
        TokenizeOutcome::Undersized { required: again } => Err(EngineError::Tokenization(
            format!("buffer of {required} tokens still too small ({again} required)"),
        )),
    }
}

/// Text bytes of `token`; empty when the runtime reports nothing printable.
pub(crate) fn piece(model: &dyn Model, token: TokenId) -> Vec<u8> {
    let mut buf = [0u8; PIECE_BUFFER_LEN];
    let written = model.token_to_piece(token, &mut buf);
    if written <= 0 {
        return Vec::new();
    }
    buf[..(written as usize).min(PIECE_BUFFER_LEN)].to_vec()
}
