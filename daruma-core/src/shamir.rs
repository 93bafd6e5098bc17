//! Shamir secret sharing over GF(2^8)
//!
//! Each byte of the secret is the constant term of its own random polynomial
//! of degree `threshold - 1`; share `x` holds the evaluation of every such
//! polynomial at `x`. Fewer than `threshold` shares are consistent with every
//! possible secret, so they reveal nothing about it.
//!
//! Arithmetic uses the Rijndael polynomial (x^8 + x^4 + x^3 + x + 1).
//!
//! Share layout:
//!
//! ```text
//! [ x: u8 (1..=255) ][ y: one byte per secret byte ]
//! ```

use crate::error::{DarumaError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use rayon::prelude::*;

/// Largest number of shares a secret can be split into
pub const MAX_SHARES: usize = 255;

mod gf256 {
    const REDUCTION: u8 = 0x1b;

    /// Branch-free carry-less multiply with reduction
    pub(super) fn mul(mut a: u8, mut b: u8) -> u8 {
        let mut product = 0u8;
        for _ in 0..8 {
            product ^= a & 0u8.wrapping_sub(b & 1);
            let carry = 0u8.wrapping_sub(a >> 7);
            a = (a << 1) ^ (REDUCTION & carry);
            b >>= 1;
        }
        product
    }

    /// Multiplicative inverse as a^254; zero maps to zero
    pub(super) fn inv(a: u8) -> u8 {
        let mut result = 1u8;
        let mut base = a;
        let mut exponent = 254u8;
        while exponent > 0 {
            if exponent & 1 == 1 {
                result = mul(result, base);
            }
            base = mul(base, base);
            exponent >>= 1;
        }
        result
    }

    pub(super) fn div(a: u8, b: u8) -> u8 {
        mul(a, inv(b))
    }
}

/// Split `secret` into `total` shares, any `threshold` of which recover it
pub fn share(secret: &[u8], threshold: usize, total: usize) -> Result<Vec<Vec<u8>>> {
    if threshold == 0 || threshold > total {
        return Err(DarumaError::IllegalArgument(format!(
            "invalid secret sharing parameters: {}-of-{}",
            threshold, total
        )));
    }
    if total > MAX_SHARES {
        return Err(DarumaError::IllegalArgument(format!(
            "share count {} exceeds maximum {}",
            total, MAX_SHARES
        )));
    }

    // coefficients[i] holds the non-constant terms for secret byte i
    let degree = threshold - 1;
    let mut random = vec![0u8; secret.len() * degree];
    OsRng.fill_bytes(&mut random);
    let coefficients: Vec<&[u8]> = if degree == 0 {
        vec![&[][..]; secret.len()]
    } else {
        random.chunks(degree).collect()
    };

    let shares = (1..=total)
        .into_par_iter()
        .map(|x| {
            let x = x as u8;
            let mut share = Vec::with_capacity(1 + secret.len());
            share.push(x);
            for (byte, coeffs) in secret.iter().zip(coefficients.iter()) {
                share.push(evaluate(*byte, coeffs, x));
            }
            share
        })
        .collect();

    Ok(shares)
}

/// Horner evaluation of `constant + coeffs[0]*x + coeffs[1]*x^2 + ...`
fn evaluate(constant: u8, coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for c in coeffs.iter().rev() {
        acc = gf256::mul(acc, x) ^ c;
    }
    gf256::mul(acc, x) ^ constant
}

/// Validate a set of shares and split them into (x, y) pairs
fn parse_shares<S: AsRef<[u8]>>(shares: &[S]) -> Result<Vec<(u8, &[u8])>> {
    let first = shares
        .first()
        .ok_or_else(|| DarumaError::Reconstruction("no shares supplied".to_string()))?;
    let len = first.as_ref().len();
    if len == 0 {
        return Err(DarumaError::Reconstruction("empty share".to_string()));
    }

    let mut seen = [false; 256];
    let mut points = Vec::with_capacity(shares.len());
    for share in shares {
        let share = share.as_ref();
        if share.len() != len {
            return Err(DarumaError::Reconstruction(format!(
                "share length mismatch: expected {}, got {}",
                len,
                share.len()
            )));
        }
        let x = share[0];
        if x == 0 {
            return Err(DarumaError::Reconstruction(
                "share has x coordinate 0".to_string(),
            ));
        }
        if seen[x as usize] {
            return Err(DarumaError::Reconstruction(format!(
                "duplicate share x coordinate {}",
                x
            )));
        }
        seen[x as usize] = true;
        points.push((x, &share[1..]));
    }
    Ok(points)
}

/// Evaluate the polynomial through `points` at `at`, byte by byte
fn interpolate(points: &[(u8, &[u8])], at: u8) -> Vec<u8> {
    let width = points.first().map(|(_, y)| y.len()).unwrap_or(0);

    // Lagrange basis weights at `at`; subtraction is XOR in GF(2^8)
    let weights: Vec<u8> = points
        .iter()
        .enumerate()
        .map(|(i, (xi, _))| {
            let mut numerator = 1u8;
            let mut denominator = 1u8;
            for (j, (xj, _)) in points.iter().enumerate() {
                if i != j {
                    numerator = gf256::mul(numerator, at ^ xj);
                    denominator = gf256::mul(denominator, xi ^ xj);
                }
            }
            gf256::div(numerator, denominator)
        })
        .collect();

    let mut result = vec![0u8; width];
    for ((_, y), weight) in points.iter().zip(weights.iter()) {
        for (out, byte) in result.iter_mut().zip(y.iter()) {
            *out ^= gf256::mul(*byte, *weight);
        }
    }
    result
}

/// Recover the secret from shares produced by [`share`]
///
/// With fewer than the original threshold of shares the output is
/// meaningless; callers must supply at least `threshold` shares.
pub fn reconstruct<S: AsRef<[u8]>>(shares: &[S]) -> Result<Vec<u8>> {
    let points = parse_shares(shares)?;
    Ok(interpolate(&points, 0))
}

/// Check whether `candidate` lies on the polynomial defined by `basis`
///
/// `basis` must hold exactly threshold-many shares for the answer to be
/// meaningful.
pub fn is_consistent<S: AsRef<[u8]>>(basis: &[S], candidate: &[u8]) -> Result<bool> {
    let points = parse_shares(basis)?;
    let width = points[0].1.len();
    if candidate.len() != width + 1 || candidate[0] == 0 {
        return Ok(false);
    }

    let x = candidate[0];
    if let Some((_, y)) = points.iter().find(|(px, _)| *px == x) {
        return Ok(*y == &candidate[1..]);
    }
    Ok(interpolate(&points, x) == candidate[1..])
}

/// x coordinate of a share, if it is well formed
pub fn share_index(share: &[u8]) -> Option<u8> {
    share.first().copied().filter(|x| *x != 0)
}
