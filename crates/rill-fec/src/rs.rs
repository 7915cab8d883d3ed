//! # Reed-Solomon Codec
//!
//! Systematic (n, k) Reed-Solomon over GF(2^8) with n = k + m ≤ 255,
//! roots α^0 .. α^(m-1) at unit spacing. Shards are encoded column-wise:
//! byte position j of every shard in a block forms one independent
//! (n, k) codeword.
//!
//! Decoding is erasure-only — the block tracker always knows which shard
//! positions are missing, so there is no error search. Correction capacity
//! is exactly m erasures per codeword.

use thiserror::Error;

use crate::gf256::{alpha_pow, gf_div, gf_inv, gf_mul};

/// Decode failure for a single codeword column.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// More erased positions than parity symbols can repair.
    #[error("{count} erasures exceed correction capacity {max}")]
    TooManyErasures { count: usize, max: usize },
    /// The corrected codeword failed the syndrome re-check, or the
    /// syndromes were non-zero with no erasures to attribute them to.
    #[error("codeword failed post-correction verification")]
    Unverified,
}

/// Stateless Reed-Solomon encoder/decoder for one (k, m) geometry.
///
/// One codec instance serves both the send and the receive path; it holds
/// only the generator polynomial.
#[derive(Debug, Clone)]
pub struct RsCodec {
    k: usize,
    m: usize,
    /// Generator polynomial Π (x − α^i), coefficients low-degree-first,
    /// gen[m] = 1.
    gen: Vec<u8>,
}

impl RsCodec {
    /// Build a codec. `k ≥ 1`, `m ≥ 1`, `k + m ≤ 255`.
    pub fn new(k: usize, m: usize) -> Result<Self, crate::config::ConfigError> {
        crate::config::validate_geometry(k, m)?;
        Ok(RsCodec {
            k,
            m,
            gen: generator_poly(m),
        })
    }

    /// Source shards per block.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Parity shards per block.
    pub fn m(&self) -> usize {
        self.m
    }

    /// Codeword length.
    pub fn n(&self) -> usize {
        self.k + self.m
    }

    /// Encode one column: `data` holds k source symbols in transmission
    /// order, `parity` receives the m parity symbols in transmission order
    /// (parity\[0\] is the coefficient of x^(m-1)).
    ///
    /// LFSR schedule computing data(x)·x^m mod g(x).
    pub fn encode(&self, data: &[u8], parity: &mut [u8]) {
        debug_assert_eq!(data.len(), self.k);
        debug_assert_eq!(parity.len(), self.m);

        parity.fill(0);
        for &d in data {
            let f = d ^ parity[0];
            for j in (1..self.m).rev() {
                parity[self.m - 1 - j] = parity[self.m - j] ^ gf_mul(f, self.gen[j]);
            }
            parity[self.m - 1] = gf_mul(f, self.gen[0]);
        }
    }

    /// Column-wise encode over whole shards. Every shard must have the same
    /// length; `parity` shards are overwritten.
    pub fn encode_shards(&self, data: &[Vec<u8>], parity: &mut [Vec<u8>]) {
        debug_assert_eq!(data.len(), self.k);
        debug_assert_eq!(parity.len(), self.m);

        let len = data.first().map(|s| s.len()).unwrap_or(0);
        let mut col = vec![0u8; self.k];
        let mut pcol = vec![0u8; self.m];

        for j in 0..len {
            for (i, shard) in data.iter().enumerate() {
                col[i] = shard[j];
            }
            self.encode(&col, &mut pcol);
            for (p, shard) in parity.iter_mut().enumerate() {
                shard[j] = pcol[p];
            }
        }
    }

    /// Erasure-only decode of one codeword column, in place.
    ///
    /// `codeword` holds all n symbols in transmission order with erased
    /// positions zeroed; `erasures` lists the erased indices (each < n, no
    /// duplicates). On success every erased position holds the corrected
    /// symbol. On failure the codeword is left as it came in.
    ///
    /// Shortening (k + m < 255) is transparent: locator positions are
    /// measured from the end of the codeword, so the virtual leading zeros
    /// never enter the computation.
    pub fn decode_erasures(
        &self,
        codeword: &mut [u8],
        erasures: &[usize],
    ) -> Result<(), DecodeError> {
        debug_assert_eq!(codeword.len(), self.n());

        let synd = self.syndromes(codeword);
        if synd.iter().all(|&s| s == 0) {
            // Either nothing was erased or the erased symbols were truly
            // zero; the codeword is already consistent.
            return Ok(());
        }
        if erasures.is_empty() {
            return Err(DecodeError::Unverified);
        }
        if erasures.len() > self.m {
            return Err(DecodeError::TooManyErasures {
                count: erasures.len(),
                max: self.m,
            });
        }

        let n = codeword.len();

        // Positions as powers of x, counted from the codeword end.
        let x_vals: Vec<u8> = erasures.iter().map(|&p| alpha_pow(n - 1 - p)).collect();

        // Erasure locator Λ(x) = Π (1 + X_i·x), highest-degree-first.
        let mut locator = vec![1u8];
        for &x in &x_vals {
            locator = poly_mul(&locator, &[x, 1]);
        }

        // Error evaluator Ω(x) = S(x)·Λ(x) mod x^(e+1), over the reversed
        // syndrome polynomial.
        let rsynd: Vec<u8> = synd.iter().rev().copied().collect();
        let evaluator = {
            let prod = poly_mul(&rsynd, &locator);
            let mut divisor = vec![0u8; locator.len() + 1];
            divisor[0] = 1;
            poly_rem(&prod, &divisor)
        };

        // Forney magnitudes.
        let mut magnitudes = vec![0u8; erasures.len()];
        for (i, &xi) in x_vals.iter().enumerate() {
            let xi_inv = gf_inv(xi);
            let mut denom = 1u8;
            for (j, &xj) in x_vals.iter().enumerate() {
                if j != i {
                    denom = gf_mul(denom, 1 ^ gf_mul(xi_inv, xj));
                }
            }
            if denom == 0 {
                return Err(DecodeError::Unverified);
            }
            let num = gf_mul(xi, poly_eval(&evaluator, xi_inv));
            magnitudes[i] = gf_div(num, denom);
        }

        for (&pos, &mag) in erasures.iter().zip(&magnitudes) {
            codeword[pos] ^= mag;
        }

        // Re-check: a clean erasure decode must leave zero syndromes.
        let check = self.syndromes(codeword);
        if check.iter().any(|&s| s != 0) {
            for (&pos, &mag) in erasures.iter().zip(&magnitudes) {
                codeword[pos] ^= mag;
            }
            return Err(DecodeError::Unverified);
        }

        Ok(())
    }

    /// Syndromes s_j = c(α^j) for j in 0..m, stored with a leading zero so
    /// the reversed polynomial lines up for the evaluator computation.
    fn syndromes(&self, codeword: &[u8]) -> Vec<u8> {
        let mut synd = vec![0u8; self.m + 1];
        for i in 1..=self.m {
            synd[i] = poly_eval(codeword, alpha_pow(i - 1));
        }
        synd
    }
}

/// g(x) = Π_{i=0..m-1} (x − α^i), built by iterative multiplication;
/// coefficients low-degree-first in m+1 bytes.
fn generator_poly(m: usize) -> Vec<u8> {
    let mut gen = vec![0u8; m + 1];
    gen[0] = 1;
    for i in 0..m {
        let root = alpha_pow(i);
        for j in (1..=m).rev() {
            gen[j] = gen[j - 1] ^ gf_mul(root, gen[j]);
        }
        gen[0] = gf_mul(root, gen[0]);
    }
    gen
}

// ─── Polynomial helpers (highest-degree-first coefficient slices) ──────────

fn poly_mul(p: &[u8], q: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; p.len() + q.len() - 1];
    for (j, &qv) in q.iter().enumerate() {
        for (i, &pv) in p.iter().enumerate() {
            out[i + j] ^= gf_mul(pv, qv);
        }
    }
    out
}

/// Remainder of p / q for a monic divisor (q[0] = 1), synthetic division.
fn poly_rem(p: &[u8], q: &[u8]) -> Vec<u8> {
    let mut work = p.to_vec();
    for i in 0..(p.len() - (q.len() - 1)) {
        let coef = work[i];
        if coef != 0 {
            for (j, &qv) in q.iter().enumerate().skip(1) {
                if qv != 0 {
                    work[i + j] ^= gf_mul(qv, coef);
                }
            }
        }
    }
    work.split_off(p.len() - (q.len() - 1))
}

fn poly_eval(p: &[u8], x: u8) -> u8 {
    let mut y = p[0];
    for &c in &p[1..] {
        y = gf_mul(y, x) ^ c;
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codeword(codec: &RsCodec, data: &[u8]) -> Vec<u8> {
        let mut parity = vec![0u8; codec.m()];
        codec.encode(data, &mut parity);
        let mut cw = data.to_vec();
        cw.extend_from_slice(&parity);
        cw
    }

    #[test]
    fn generator_is_monic_with_right_degree() {
        for m in 1..=8 {
            let gen = generator_poly(m);
            assert_eq!(gen.len(), m + 1);
            assert_eq!(gen[m], 1, "g(x) must be monic for m={m}");
        }
    }

    #[test]
    fn generator_vanishes_at_its_roots() {
        let m = 6;
        let gen = generator_poly(m);
        // poly_eval expects highest-first
        let gen_h: Vec<u8> = gen.iter().rev().copied().collect();
        for i in 0..m {
            assert_eq!(poly_eval(&gen_h, alpha_pow(i)), 0, "g(α^{i}) != 0");
        }
        // and not at the next power
        assert_ne!(poly_eval(&gen_h, alpha_pow(m)), 0);
    }

    #[test]
    fn encoded_codeword_has_zero_syndromes() {
        let codec = RsCodec::new(5, 3).unwrap();
        let cw = codeword(&codec, &[0x11, 0x22, 0x33, 0x44, 0x55]);
        assert!(codec.syndromes(&cw).iter().all(|&s| s == 0));
    }

    #[test]
    fn single_parity_is_xor_of_data() {
        // With m = 1 the only root is α^0 = 1, so the parity symbol is the
        // XOR of the data symbols.
        let codec = RsCodec::new(4, 1).unwrap();
        let data = [0x0f, 0xf0, 0x55, 0xaa];
        let mut parity = [0u8];
        codec.encode(&data, &mut parity);
        assert_eq!(parity[0], 0x0f ^ 0xf0 ^ 0x55 ^ 0xaa);
    }

    #[test]
    fn decode_clean_codeword_is_noop() {
        let codec = RsCodec::new(4, 2).unwrap();
        let cw = codeword(&codec, &[1, 2, 3, 4]);
        let mut got = cw.clone();
        codec.decode_erasures(&mut got, &[]).unwrap();
        assert_eq!(got, cw);
    }

    #[test]
    fn decode_recovers_single_data_erasure() {
        let codec = RsCodec::new(4, 2).unwrap();
        let cw = codeword(&codec, &[10, 20, 30, 40]);
        let mut damaged = cw.clone();
        damaged[2] = 0;
        codec.decode_erasures(&mut damaged, &[2]).unwrap();
        assert_eq!(damaged, cw);
    }

    #[test]
    fn decode_recovers_full_capacity() {
        let codec = RsCodec::new(6, 3).unwrap();
        let cw = codeword(&codec, &[9, 8, 7, 6, 5, 4]);
        let mut damaged = cw.clone();
        for &p in &[0usize, 3, 7] {
            damaged[p] = 0;
        }
        codec.decode_erasures(&mut damaged, &[0, 3, 7]).unwrap();
        assert_eq!(damaged, cw);
    }

    #[test]
    fn decode_recovers_parity_erasure() {
        let codec = RsCodec::new(3, 2).unwrap();
        let cw = codeword(&codec, &[0xde, 0xad, 0xbe]);
        let mut damaged = cw.clone();
        damaged[4] = 0;
        codec.decode_erasures(&mut damaged, &[4]).unwrap();
        assert_eq!(damaged, cw);
    }

    #[test]
    fn decode_rejects_over_capacity() {
        let codec = RsCodec::new(4, 2).unwrap();
        let cw = codeword(&codec, &[1, 2, 3, 4]);
        let mut damaged = cw.clone();
        for &p in &[0usize, 1, 2] {
            damaged[p] = 0;
        }
        let before = damaged.clone();
        let err = codec.decode_erasures(&mut damaged, &[0, 1, 2]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TooManyErasures { count: 3, max: 2 }
        );
        assert_eq!(damaged, before, "failed decode must not modify the codeword");
    }

    #[test]
    fn decode_zero_valued_erasure_succeeds() {
        // Erasing a symbol that really was zero leaves the syndromes clean;
        // decode must treat that as success.
        let codec = RsCodec::new(3, 2).unwrap();
        let cw = codeword(&codec, &[0, 0, 0]);
        let mut damaged = cw.clone();
        codec.decode_erasures(&mut damaged, &[1]).unwrap();
        assert_eq!(damaged, cw);
    }

    #[test]
    fn shard_encode_matches_column_encode() {
        let codec = RsCodec::new(3, 2).unwrap();
        let data: Vec<Vec<u8>> = vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9, 10, 11, 12]];
        let mut parity = vec![vec![0u8; 4]; 2];
        codec.encode_shards(&data, &mut parity);

        for j in 0..4 {
            let col: Vec<u8> = data.iter().map(|s| s[j]).collect();
            let mut pcol = vec![0u8; 2];
            codec.encode(&col, &mut pcol);
            assert_eq!(parity[0][j], pcol[0]);
            assert_eq!(parity[1][j], pcol[1]);
        }
    }

    #[test]
    fn geometry_limits_enforced() {
        assert!(RsCodec::new(0, 1).is_err());
        assert!(RsCodec::new(1, 0).is_err());
        assert!(RsCodec::new(200, 100).is_err());
        assert!(RsCodec::new(254, 1).is_ok());
    }
}
