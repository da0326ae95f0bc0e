use candle_core::{Result, Tensor};
use candle_nn::rnn::{LSTMConfig, LSTMState, LSTM, RNN};
use candle_nn::{Embedding, Linear, Module, VarBuilder};

use crate::config::ClassifierConfig;
use crate::feed::Feed;

/// Added to padded word positions before max-pooling.
const PAD_PENALTY: f64 = 1e9;

/// Character BiLSTM network.
///
/// `char ⊕ char-class embedding → char LSTM (final h per word) →
/// forward/backward word LSTMs → max-pool over words → linear`.
pub struct CharLstmNet {
    char_embedding: Embedding,
    type_embedding: Embedding,
    char_lstm: LSTM,
    word_fwd: LSTM,
    word_bwd: LSTM,
    output: Linear,
    lstm_dim: usize,
    dropout_keep: f64,
}

impl CharLstmNet {
    /// Variable-name prefix of the character embedding.
    pub const CHAR_EMBEDDING: &'static str = "char_embedding";

    /// Build the network, creating (or loading) its parameters through `vb`.
    pub fn new(config: &ClassifierConfig, num_labels: usize, vb: VarBuilder) -> Result<Self> {
        let char_embedding = candle_nn::embedding(
            config.char_buckets,
            config.embedding_size,
            vb.pp(Self::CHAR_EMBEDDING),
        )?;
        let type_embedding = candle_nn::embedding(
            config.type_buckets(),
            config.type_embedding_size,
            vb.pp("type_embedding"),
        )?;

        let char_lstm = candle_nn::lstm(
            config.char_input_size(),
            config.lstm_dim,
            LSTMConfig::default(),
            vb.pp("char_lstm"),
        )?;
        let word_fwd = candle_nn::lstm(
            config.lstm_dim,
            config.lstm_dim,
            LSTMConfig::default(),
            vb.pp("word_fwd"),
        )?;
        let word_bwd = candle_nn::lstm(
            config.lstm_dim,
            config.lstm_dim,
            LSTMConfig::default(),
            vb.pp("word_bwd"),
        )?;

        let output = candle_nn::linear(2 * config.lstm_dim, num_labels, vb.pp("output"))?;

        Ok(Self {
            char_embedding,
            type_embedding,
            char_lstm,
            word_fwd,
            word_bwd,
            output,
            lstm_dim: config.lstm_dim,
            dropout_keep: config.dropout_keep,
        })
    }

    /// Logits `[B, num_labels]`. Dropout is only active when `train` is set.
    pub fn forward(&self, feed: &Feed, train: bool) -> Result<Tensor> {
        let words = self.encode_words(feed)?;

        let b = feed.batch_size();
        let lw = feed.max_words();
        let sentences = words
            .index_select(&feed.word_index.flatten_all()?, 0)?
            .reshape((b, lw, self.lstm_dim))?;

        let (fwd, _) = run_masked(&self.word_fwd, &sentences, &feed.word_mask, false)?;
        let (bwd, _) = run_masked(&self.word_bwd, &sentences, &feed.word_mask, true)?;
        let fwd = Tensor::stack(&fwd, 1)?;
        let bwd = Tensor::stack(&bwd, 1)?;
        let states = Tensor::cat(&[&fwd, &bwd], 2)?;

        // [B, Lw, 1]: 0 on real words, -PAD_PENALTY on padding
        let penalty = feed
            .word_mask
            .affine(PAD_PENALTY, -PAD_PENALTY)?
            .unsqueeze(2)?;
        let mut pooled = states.broadcast_add(&penalty)?.max(1)?;

        if train && self.dropout_keep < 1.0 {
            pooled = candle_nn::ops::dropout(&pooled, (1.0 - self.dropout_keep) as f32)?;
        }

        self.output.forward(&pooled)
    }

    /// Final char-LSTM hidden state of every word in the batch, `[W, lstm_dim]`.
    fn encode_words(&self, feed: &Feed) -> Result<Tensor> {
        let chars = self.char_embedding.forward(&feed.char_ids)?;
        let types = self.type_embedding.forward(&feed.type_ids)?;
        let inputs = Tensor::cat(&[&chars, &types], 2)?;

        let (_, last) = run_masked(&self.char_lstm, &inputs, &feed.char_mask, false)?;
        Ok(last)
    }
}

/// Run `lstm` over `xs` `[N, T, F]` step by step.
///
/// Where `mask` `[N, T]` is zero the previous state is carried through
/// unchanged, so each row ends on the state after its last real step. With
/// `reverse` the sequence is consumed right to left, which starts every row
/// at its own last real element. Returns the per-step hidden outputs in
/// input order and the final hidden state.
fn run_masked(
    lstm: &LSTM,
    xs: &Tensor,
    mask: &Tensor,
    reverse: bool,
) -> Result<(Vec<Tensor>, Tensor)> {
    let (n, t_len, _) = xs.dims3()?;
    let mut state = lstm.zero_state(n)?;
    let mut outputs = Vec::with_capacity(t_len);

    let steps: Vec<usize> = if reverse {
        (0..t_len).rev().collect()
    } else {
        (0..t_len).collect()
    };

    for t in steps {
        let x_t = xs.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
        let live = mask.narrow(1, t, 1)?;
        let held = live.affine(-1.0, 1.0)?;

        let next = lstm.step(&x_t, &state)?;
        let h = next
            .h()
            .broadcast_mul(&live)?
            .add(&state.h().broadcast_mul(&held)?)?;
        let c = next
            .c()
            .broadcast_mul(&live)?
            .add(&state.c().broadcast_mul(&held)?)?;

        state = LSTMState::new(h, c);
        outputs.push(state.h().clone());
    }

    if reverse {
        outputs.reverse();
    }
    Ok((outputs, state.h().clone()))
}
