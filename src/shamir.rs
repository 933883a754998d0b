//! Shamir secret sharing over GF(256)
//!
//! The secret is shared bytewise: for every byte a random polynomial of
//! degree `threshold - 1` is drawn with that byte as constant term and
//! evaluated at x = 1..=total. Any `threshold` shares recover the secret by
//! Lagrange interpolation at x = 0; fewer reveal nothing about it.
//!
//! Field arithmetic uses the AES reduction polynomial 0x11b.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::SecureBytes;
use crate::error::{Result, VaultError};

/// Textual prefix of an encoded share
pub const SHARE_PREFIX: &str = "kmss1";

/// One evaluation point `(x, f(x))` of the sharing polynomials
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    #[zeroize(skip)]
    pub x: u8,
    pub y: Vec<u8>,
}

impl Share {
    /// `kmss1-<x as 2 hex digits>-<y as hex>`
    pub fn encode(&self) -> String {
        format!("{}-{:02x}-{}", SHARE_PREFIX, self.x, hex::encode(&self.y))
    }

    /// Parse a share produced by [`Share::encode`]; whitespace is ignored
    pub fn parse(text: &str) -> Result<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let mut parts = compact.splitn(3, '-');

        let (Some(prefix), Some(x), Some(y)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(VaultError::validation("share is not in kmss1-XX-... form"));
        };
        if !prefix.eq_ignore_ascii_case(SHARE_PREFIX) {
            return Err(VaultError::Validation(format!("unknown share format '{}'", prefix)));
        }

        let x = u8::from_str_radix(x, 16)
            .map_err(|_| VaultError::Validation(format!("invalid share index '{}'", x)))?;
        if x == 0 {
            return Err(VaultError::validation("share index 0 is reserved for the secret"));
        }
        let y = hex::decode(y).map_err(|e| VaultError::Validation(format!("invalid share data: {}", e)))?;
        if y.is_empty() {
            return Err(VaultError::validation("share carries no data"));
        }

        Ok(Self { x, y })
    }
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("x", &self.x)
            .field("len", &self.y.len())
            .finish()
    }
}

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut p = 0u8;
    for _ in 0..8 {
        if b & 1 == 1 {
            p ^= a;
        }
        let hi = a & 0x80;
        a <<= 1;
        if hi != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    p
}

fn gf_pow(mut a: u8, mut e: u8) -> u8 {
    let mut r = 1u8;
    while e > 0 {
        if e & 1 == 1 {
            r = gf_mul(r, a);
        }
        a = gf_mul(a, a);
        e >>= 1;
    }
    r
}

/// a^254 == a^-1 for a != 0
fn gf_inv(a: u8) -> Result<u8> {
    if a == 0 {
        return Err(VaultError::validation("zero has no inverse in GF(256)"));
    }
    Ok(gf_pow(a, 254))
}

/// Split `secret` into `total` shares, any `threshold` of which recover it
pub fn split(secret: &[u8], threshold: u8, total: u8) -> Result<Vec<Share>> {
    if secret.is_empty() {
        return Err(VaultError::validation("cannot share an empty secret"));
    }
    if threshold == 0 || threshold > total {
        return Err(VaultError::Validation(format!(
            "invalid Shamir parameters: threshold={}, total={}",
            threshold, total
        )));
    }

    let degree = threshold as usize - 1;
    // coeffs[b * degree + j] is the coefficient of x^(j+1) for secret byte b
    let mut coeffs = vec![0u8; secret.len() * degree];
    OsRng.fill_bytes(&mut coeffs);

    let mut shares = Vec::with_capacity(total as usize);
    for x in 1..=total {
        let mut y = vec![0u8; secret.len()];
        for (b, out) in y.iter_mut().enumerate() {
            let mut acc = secret[b];
            let mut xp = 1u8;
            for c in &coeffs[b * degree..(b + 1) * degree] {
                xp = gf_mul(xp, x);
                acc ^= gf_mul(*c, xp);
            }
            *out = acc;
        }
        shares.push(Share { x, y });
    }

    coeffs.zeroize();
    Ok(shares)
}

/// Recover the secret from at least `threshold` distinct shares
pub fn combine(shares: &[Share], threshold: u8) -> Result<SecureBytes> {
    if threshold == 0 {
        return Err(VaultError::validation("threshold must be at least 1"));
    }

    for (i, a) in shares.iter().enumerate() {
        if a.x == 0 {
            return Err(VaultError::validation("share index 0 is reserved for the secret"));
        }
        if shares[..i].iter().any(|b| b.x == a.x) {
            return Err(VaultError::Validation(format!("share #{} was provided more than once", a.x)));
        }
    }

    if shares.len() < threshold as usize {
        return Err(VaultError::InsufficientShares {
            provided: shares.len(),
            required: threshold as usize,
        });
    }

    let used = &shares[..threshold as usize];
    let len = used[0].y.len();
    if used.iter().any(|s| s.y.len() != len) {
        return Err(VaultError::validation("shares belong to different secrets (length mismatch)"));
    }

    // λ_i(0) = Π_{j≠i} x_j / (x_j - x_i); subtraction is XOR in GF(256)
    let mut basis = Vec::with_capacity(used.len());
    for (i, si) in used.iter().enumerate() {
        let mut num = 1u8;
        let mut den = 1u8;
        for (j, sj) in used.iter().enumerate() {
            if i == j {
                continue;
            }
            num = gf_mul(num, sj.x);
            den = gf_mul(den, sj.x ^ si.x);
        }
        basis.push(gf_mul(num, gf_inv(den)?));
    }

    let mut secret = vec![0u8; len];
    for (b, out) in secret.iter_mut().enumerate() {
        *out = used
            .iter()
            .zip(&basis)
            .fold(0u8, |acc, (share, l)| acc ^ gf_mul(share.y[b], *l));
    }

    Ok(SecureBytes::new(secret))
}
