//! Deterministic scripted runtime.
//!
//! A "model file" is a JSON [`MockManifest`]: metadata, dimensions, the reply
//! the model produces, and faults to inject. The tokenizer is byte level with a
//! BOS token, so prompts of any content tokenize predictably. Logits are one-hot
//! at the next scripted reply piece and the sampler is arg-max, so every run of
//! the same manifest produces the same tokens whatever sampler chain was asked
//! for (the chain is still recorded for inspection).
//!
//! Vocabulary layout:
//!
//! | id | token |
//! |---|---|
//! | 0 | BOS `<s>` |
//! | 1 | EOS `</s>` |
//! | 2 | padding |
//! | 3..=258 | raw bytes `0x00..=0xFF` |
//! | 259.. | reply pieces in manifest order |

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use peer_engine::{
    CancelToken, Context, ContextParams, EngineError, Model, ModelParams, Result, Runtime,
    Sampler, SamplerStage, TokenId, TokenizeOutcome,
};
use serde::{Deserialize, Serialize};

pub const BOS: TokenId = 0;
pub const EOS: TokenId = 1;
const PAD: TokenId = 2;
const BYTE_BASE: TokenId = 3;
const REPLY_BASE: TokenId = 259;

/// Faults a scripted model injects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Faults {
    /// Refuse to load at all.
    pub model_load: bool,
    /// Refuse to create any context.
    pub context: bool,
    /// Refuse to create embeddings contexts only.
    pub embedding_context: bool,
    /// Fail the first decode after a memory clear.
    pub prefill: bool,
    /// Fail the n-th (1-based) single-token decode after a memory clear.
    pub decode_at: Option<usize>,
    /// Refuse to build sampler chains.
    pub sampler: bool,
    /// Fail tokenization of any text containing this marker.
    pub tokenize_on: Option<String>,
    /// Fail encoding of any text containing this marker.
    pub encode_on: Option<String>,
}

/// The content of a scripted model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockManifest {
    pub metadata: BTreeMap<String, String>,
    pub n_ctx_train: i32,
    pub n_layer: i32,
    pub n_embd: i32,
    /// Pieces emitted one token each, in order.
    pub reply: Vec<String>,
    /// Cycle through `reply` forever instead of ending with EOS.
    pub repeat: bool,
    /// Tokens emitted per prompt byte.
    pub tokens_per_byte: usize,
    /// Whether an undersized tokenization reports the capacity it needs.
    pub reports_capacity: bool,
    /// Sleep before every single-token decode, in milliseconds.
    pub step_delay_ms: u64,
    pub faults: Faults,
}

impl Default for MockManifest {
    fn default() -> Self {
        Self {
            metadata: BTreeMap::new(),
            n_ctx_train: 2048,
            n_layer: 4,
            n_embd: 8,
            reply: vec!["Hello".into(), ",".into(), " world".into(), "!".into()],
            repeat: false,
            tokens_per_byte: 1,
            reports_capacity: true,
            step_delay_ms: 0,
            faults: Faults::default(),
        }
    }
}

impl MockManifest {
    pub fn new<S: AsRef<str>>(reply: &[S]) -> Self {
        Self {
            reply: reply.iter().map(|s| s.as_ref().to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_embedding_dim(mut self, n_embd: i32) -> Self {
        self.n_embd = n_embd;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Write this manifest as a model file.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)
    }

    fn n_vocab(&self) -> usize {
        REPLY_BASE as usize + self.reply.len()
    }

    /// Token the model wants after `step` generated tokens.
    fn next_token(&self, step: usize) -> TokenId {
        if self.reply.is_empty() {
            return EOS;
        }
        if step < self.reply.len() {
            REPLY_BASE + step as TokenId
        } else if self.repeat {
            REPLY_BASE + (step % self.reply.len()) as TokenId
        } else {
            EOS
        }
    }
}

/// Observations shared by a backend and every handle it creates.
#[derive(Debug, Default)]
struct Recorder {
    init_calls: AtomicUsize,
    live_models: AtomicUsize,
    live_contexts: AtomicUsize,
    /// Sampler fault of the most recently loaded model.
    sampler_fault: AtomicBool,
    model_params: Mutex<Option<ModelParams>>,
    context_params: Mutex<Option<ContextParams>>,
    sampler_stages: Mutex<Vec<SamplerStage>>,
}

fn record<T>(slot: &Mutex<T>, value: T) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

fn read<T: Clone>(slot: &Mutex<T>) -> T {
    slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Runtime binding over [`MockManifest`] model files.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    recorder: Arc<Recorder>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_count(&self) -> usize {
        self.recorder.init_calls.load(Ordering::SeqCst)
    }

    /// Models alive right now.
    pub fn live_models(&self) -> usize {
        self.recorder.live_models.load(Ordering::SeqCst)
    }

    /// Contexts alive right now.
    pub fn live_contexts(&self) -> usize {
        self.recorder.live_contexts.load(Ordering::SeqCst)
    }

    pub fn last_model_params(&self) -> Option<ModelParams> {
        read(&self.recorder.model_params)
    }

    pub fn last_context_params(&self) -> Option<ContextParams> {
        read(&self.recorder.context_params)
    }

    pub fn last_sampler_stages(&self) -> Vec<SamplerStage> {
        read(&self.recorder.sampler_stages)
    }
}

impl Runtime for ScriptedBackend {
    fn init(&self) {
        self.recorder.init_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Box<dyn Model>> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::ModelLoad(format!("{}: {e}", path.display())))?;
        let manifest: MockManifest = serde_json::from_str(&raw)
            .map_err(|e| EngineError::ModelLoad(format!("invalid manifest: {e}")))?;
        if manifest.faults.model_load {
            return Err(EngineError::ModelLoad("scripted load failure".into()));
        }

        record(&self.recorder.model_params, Some(params.clone()));
        self.recorder
            .sampler_fault
            .store(manifest.faults.sampler, Ordering::SeqCst);
        self.recorder.live_models.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(path = %path.display(), pieces = manifest.reply.len(), "scripted model loaded");

        Ok(Box::new(ScriptedModel {
            script: Arc::new(manifest),
            recorder: Arc::clone(&self.recorder),
        }))
    }

    fn sampler(&self, stages: &[SamplerStage]) -> Result<Box<dyn Sampler>> {
        if self.recorder.sampler_fault.load(Ordering::SeqCst) {
            return Err(EngineError::Sampler("scripted sampler failure".into()));
        }
        if stages.is_empty() {
            return Err(EngineError::Sampler("empty sampler chain".into()));
        }
        record(&self.recorder.sampler_stages, stages.to_vec());
        Ok(Box::new(ArgMaxSampler::default()))
    }
}

struct ScriptedModel {
    script: Arc<MockManifest>,
    recorder: Arc<Recorder>,
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.recorder.live_models.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Model for ScriptedModel {
    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn Context>> {
        let faults = &self.script.faults;
        if faults.context || (params.embeddings && faults.embedding_context) {
            return Err(EngineError::ContextCreate("scripted context failure".into()));
        }

        record(&self.recorder.context_params, Some(params.clone()));
        self.recorder.live_contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            script: Arc::clone(&self.script),
            recorder: Arc::clone(&self.recorder),
            params: params.clone(),
            memory: Memory::default(),
            logits: vec![0.0; self.script.n_vocab()],
            embedding: None,
            abort: None,
        }))
    }

    fn tokenize(
        &self,
        text: &str,
        out: &mut [TokenId],
        add_special: bool,
        _parse_special: bool,
    ) -> Result<TokenizeOutcome> {
        if let Some(marker) = &self.script.faults.tokenize_on {
            if text.contains(marker.as_str()) {
                return Err(EngineError::Tokenization(format!("scripted failure on `{marker}`")));
            }
        }

        let per_byte = self.script.tokens_per_byte.max(1);
        let mut tokens = Vec::with_capacity(text.len() * per_byte + 1);
        if add_special {
            tokens.push(BOS);
        }
        for byte in text.bytes() {
            for _ in 0..per_byte {
                tokens.push(BYTE_BASE + byte as TokenId);
            }
        }

        if tokens.len() > out.len() {
            let required = if self.script.reports_capacity {
                tokens.len()
            } else {
                0
            };
            return Ok(TokenizeOutcome::Undersized { required });
        }
        out[..tokens.len()].copy_from_slice(&tokens);
        Ok(TokenizeOutcome::Written(tokens.len()))
    }

    fn reports_required_capacity(&self) -> bool {
        self.script.reports_capacity
    }

    fn token_to_piece(&self, token: TokenId, buf: &mut [u8]) -> i32 {
        let byte;
        let piece: &[u8] = match token {
            BOS | EOS | PAD => return 0,
            t if (BYTE_BASE..REPLY_BASE).contains(&t) => {
                byte = [(t - BYTE_BASE) as u8];
                &byte
            }
            t if t >= REPLY_BASE => match self.script.reply.get((t - REPLY_BASE) as usize) {
                Some(piece) => piece.as_bytes(),
                None => return 0,
            },
            _ => return 0,
        };
        if piece.len() > buf.len() {
            return -(piece.len() as i32);
        }
        buf[..piece.len()].copy_from_slice(piece);
        piece.len() as i32
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        token == EOS
    }

    fn n_ctx_train(&self) -> i32 {
        self.script.n_ctx_train
    }

    fn n_layer(&self) -> i32 {
        self.script.n_layer
    }

    fn n_embd(&self) -> i32 {
        self.script.n_embd
    }

    fn n_vocab(&self) -> i32 {
        self.script.n_vocab() as i32
    }

    fn meta_value(&self, key: &str, buf: &mut [u8]) -> Option<usize> {
        let value = self.script.metadata.get(key)?.as_bytes();
        let n = value.len().min(buf.len());
        buf[..n].copy_from_slice(&value[..n]);
        Some(value.len())
    }
}

/// The serialisable part of a context: what has been decoded since the last clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Memory {
    history: Vec<TokenId>,
    steps: usize,
}

struct ScriptedContext {
    script: Arc<MockManifest>,
    recorder: Arc<Recorder>,
    params: ContextParams,
    memory: Memory,
    logits: Vec<f32>,
    embedding: Option<Vec<f32>>,
    abort: Option<CancelToken>,
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.recorder.live_contexts.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedContext {
    fn aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    fn set_one_hot(&mut self, token: TokenId) {
        self.logits.iter_mut().for_each(|l| *l = 0.0);
        if let Some(slot) = self.logits.get_mut(token as usize) {
            *slot = 1.0;
        }
    }

    fn bytes_of(tokens: &[TokenId]) -> Vec<u8> {
        tokens
            .iter()
            .filter(|t| (BYTE_BASE..REPLY_BASE).contains(*t))
            .map(|t| (t - BYTE_BASE) as u8)
            .collect()
    }
}

impl Context for ScriptedContext {
    fn set_threads(&mut self, n_threads: u32, n_threads_batch: u32) {
        self.params.n_threads = n_threads;
        self.params.n_threads_batch = n_threads_batch;
    }

    fn set_abort_probe(&mut self, probe: CancelToken) {
        self.abort = Some(probe);
    }

    fn clear_memory(&mut self, _discard_data: bool) {
        self.memory = Memory::default();
        self.logits.iter_mut().for_each(|l| *l = 0.0);
    }

    fn decode(&mut self, tokens: &[TokenId]) -> Result<()> {
        if tokens.is_empty() {
            return Err(EngineError::Decode(-1));
        }
        if self.aborted() {
            return Err(EngineError::Decode(2));
        }
        if self.memory.history.len() + tokens.len() > self.params.n_ctx as usize {
            return Err(EngineError::Decode(1));
        }

        let faults = &self.script.faults;
        let prefill = self.memory.history.is_empty();
        if prefill {
            if faults.prefill {
                return Err(EngineError::Decode(-3));
            }
        } else {
            if self.script.step_delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.script.step_delay_ms));
            }
            if faults.decode_at == Some(self.memory.steps + 1) {
                return Err(EngineError::Decode(-3));
            }
            self.memory.steps += 1;
        }

        self.memory.history.extend_from_slice(tokens);
        let next = self.script.next_token(self.memory.steps);
        self.set_one_hot(next);
        Ok(())
    }

    fn encode(&mut self, tokens: &[TokenId]) -> Result<()> {
        self.embedding = None;
        if !self.params.embeddings || tokens.is_empty() {
            return Err(EngineError::Encode(-1));
        }
        if let Some(marker) = &self.script.faults.encode_on {
            let text = Self::bytes_of(tokens);
            if String::from_utf8_lossy(&text).contains(marker.as_str()) {
                return Err(EngineError::Encode(-3));
            }
        }

        let seed: i64 = tokens.iter().map(|&t| t as i64).sum();
        let embedding = (0..self.script.n_embd.max(0) as i64)
            .map(|i| ((seed + i * 31) % 1000) as f32 / 1000.0)
            .collect();
        self.embedding = Some(embedding);
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn embeddings(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    fn n_ctx(&self) -> u32 {
        self.params.n_ctx
    }

    fn state_size(&self) -> usize {
        serde_json::to_vec(&self.memory).map(|v| v.len()).unwrap_or(0)
    }

    fn state_read(&self, dst: &mut [u8]) -> usize {
        let Ok(bytes) = serde_json::to_vec(&self.memory) else {
            return 0;
        };
        let n = bytes.len().min(dst.len());
        dst[..n].copy_from_slice(&bytes[..n]);
        n
    }

    fn state_write(&mut self, src: &[u8]) -> usize {
        match serde_json::from_slice::<Memory>(src) {
            Ok(memory) => {
                self.memory = memory;
                let next = self.script.next_token(self.memory.steps);
                self.set_one_hot(next);
                src.len()
            }
            Err(_) => 0,
        }
    }
}

/// Arg-max sampler that remembers what it accepted.
#[derive(Debug, Default)]
struct ArgMaxSampler {
    accepted: Vec<TokenId>,
}

impl Sampler for ArgMaxSampler {
    fn sample(&mut self, logits: &[f32]) -> TokenId {
        logits
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, &l)| match best {
                Some((_, b)) if b >= l => best,
                _ => Some((i, l)),
            })
            .map(|(i, _)| i as TokenId)
            .unwrap_or(EOS)
    }

    fn accept(&mut self, token: TokenId) {
        self.accepted.push(token);
    }
}
