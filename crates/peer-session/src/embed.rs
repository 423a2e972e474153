//! Embeddings through a temporary context.

use peer_engine::ContextParams;
use tracing::warn;

use crate::error::{Result, SessionError};
use crate::session::Session;
use crate::tokens;

impl Session {
    /// One embedding per text, in input order.
    ///
    /// A text that fails to tokenize or encode gets an empty vector; the other
    /// texts are unaffected. The embeddings context is created from the loaded
    /// model for this call only and released before returning.
    pub fn embed<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Vec<f32>>> {
        let state = self.lock();
        let loaded = state.loaded.as_ref().ok_or(SessionError::NotLoaded)?;
        self.init();

        let n_threads = state.config.threads;
        let params = ContextParams {
            n_ctx: state.config.context_length,
            n_threads,
            n_threads_batch: n_threads,
            embeddings: true,
            ..ContextParams::default()
        };
        let mut ctx = loaded.model.new_context(&params).map_err(|err| {
            warn!(error = %err, "failed to create embeddings context");
            SessionError::Engine(err)
        })?;
        ctx.set_threads(n_threads, n_threads);

        let dim = usize::try_from(loaded.model.n_embd()).unwrap_or(0);
        let mut out = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            let tokens = match tokens::tokenize(loaded.model.as_ref(), text.as_ref()) {
                Ok(tokens) if !tokens.is_empty() => tokens,
                Ok(_) => {
                    out.push(Vec::new());
                    continue;
                }
                Err(err) => {
                    warn!(index, error = %err, "embedding input failed to tokenize");
                    out.push(Vec::new());
                    continue;
                }
            };
            if let Err(err) = ctx.encode(&tokens) {
                warn!(index, error = %err, "encode failed for embeddings");
                out.push(Vec::new());
                continue;
            }

            let vector = match ctx.embeddings() {
                Some(values) if dim > 0 => values[..dim.min(values.len())].to_vec(),
                _ => Vec::new(),
            };
            out.push(vector);
        }
        Ok(out)
    }
}
