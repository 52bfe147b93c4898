//! Schnorr signatures over Ristretto, single-key and threshold.
//!
//! The notary identity is one Schnorr public key. A single-node notary
//! holds the whole secret; a replicated cluster holds Shamir shares of it,
//! each replica contributing an independent partial proof over the payload.
//! Any `t` valid contributions aggregate, via Lagrange weights at zero,
//! into evidence that verifies against the group key alone.
//!
//! Verification equation for a contribution set Q with challenges
//! `c_i = H(u_i || payload)`, normalizer `c̄ = Π c_i` and weights
//! `μ_i = λ_i · Π_{j≠i} c_j`:
//!
//! ```text
//! g^{Σ μ_i·s_i} = Y^{c̄} · Π u_i^{μ_i}
//! ```

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::MultiscalarMul;
use rand::{CryptoRng, RngCore};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512};
use thiserror::Error;
use vigil_merkle::{PublicKey, SignatureBytes};

/// Wire size of one contribution: index, compressed commitment, response.
pub const CONTRIBUTION_BYTES: usize = 4 + 32 + 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThresholdError {
    #[error("no contributions provided")]
    EmptyContributions,

    #[error("insufficient contributions: got {got}, need {need}")]
    InsufficientContributions { got: usize, need: usize },

    #[error("duplicate share index {0}")]
    DuplicateIndex(u32),

    #[error("share index must be greater than 0")]
    InvalidIndex,

    #[error("challenge hash is zero")]
    ZeroChallenge,

    #[error("invalid curve point")]
    InvalidPoint,

    #[error("invalid scalar encoding")]
    InvalidScalar,

    #[error("contribution must be {CONTRIBUTION_BYTES} bytes")]
    BadLength,
}

/// `H(commitment || payload)` mapped to a scalar.
fn challenge(commitment: &CompressedRistretto, payload: &[u8]) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(commitment.as_bytes());
    hasher.update(payload);
    let wide: [u8; 64] = hasher.finalize().into();
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// A complete Schnorr signing key; the single-node notary identity.
#[derive(Clone)]
pub struct SchnorrKeyPair {
    secret: Scalar,
    public: RistrettoPoint,
}

impl SchnorrKeyPair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = Scalar::random(rng);
        SchnorrKeyPair {
            secret,
            public: RistrettoPoint::mul_base(&secret),
        }
    }

    /// Deterministic key from a 32-byte seed; lets a node keep its identity
    /// across restarts without key files.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let wide: [u8; 64] = Sha512::digest(seed).into();
        let secret = Scalar::from_bytes_mod_order_wide(&wide);
        SchnorrKeyPair {
            secret,
            public: RistrettoPoint::mul_base(&secret),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public.compress().to_bytes()
    }

    /// Derandomized Schnorr signature: the nonce is derived from the secret
    /// and the message, so equal inputs give equal signatures.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let mut hasher = Sha512::new();
        hasher.update(self.secret.to_bytes());
        hasher.update(message);
        let wide: [u8; 64] = hasher.finalize().into();
        let r = Scalar::from_bytes_mod_order_wide(&wide);

        let commitment = RistrettoPoint::mul_base(&r).compress();
        let c = challenge(&commitment, message);
        let s = r + c * self.secret;

        let mut signature = [0u8; 64];
        signature[..32].copy_from_slice(commitment.as_bytes());
        signature[32..].copy_from_slice(&s.to_bytes());
        signature
    }
}

/// Verify a single-key Schnorr signature.
pub fn verify_signature(public: &PublicKey, message: &[u8], signature: &SignatureBytes) -> bool {
    let mut commitment_bytes = [0u8; 32];
    commitment_bytes.copy_from_slice(&signature[..32]);
    let compressed = CompressedRistretto(commitment_bytes);
    let commitment = match compressed.decompress() {
        Some(p) => p,
        None => return false,
    };
    let public_point = match CompressedRistretto(*public).decompress() {
        Some(p) => p,
        None => return false,
    };
    let mut s_bytes = [0u8; 32];
    s_bytes.copy_from_slice(&signature[32..]);
    let s = match Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes)) {
        Some(s) => s,
        None => return false,
    };
    let c = challenge(&compressed, message);
    RistrettoPoint::mul_base(&s) == commitment + public_point * c
}

/// One replica's share of the notary secret (1-indexed, Shamir convention).
#[derive(Clone)]
pub struct SecretShare {
    pub index: u32,
    scalar: Scalar,
}

impl SecretShare {
    pub fn new(index: u32, scalar: Scalar) -> Self {
        assert!(index > 0, "share index must be 1-indexed");
        SecretShare { index, scalar }
    }

    /// Produce a partial proof over `payload`:
    /// `u_i = g^{r_i}`, `s_i = r_i + c_i · x_i`, `c_i = H(u_i || payload)`.
    pub fn contribute<R: RngCore + CryptoRng>(&self, rng: &mut R, payload: &[u8]) -> Contribution {
        let r = Scalar::random(rng);
        let commitment = RistrettoPoint::mul_base(&r);
        let c = challenge(&commitment.compress(), payload);
        Contribution {
            index: self.index,
            commitment,
            response: r + c * self.scalar,
        }
    }

    /// Public key share `y_i = g^{x_i}`.
    pub fn public_share(&self) -> RistrettoPoint {
        RistrettoPoint::mul_base(&self.scalar)
    }
}

/// A partial signature from one share holder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contribution {
    pub index: u32,
    pub commitment: RistrettoPoint,
    pub response: Scalar,
}

impl Contribution {
    pub fn to_bytes(&self) -> [u8; CONTRIBUTION_BYTES] {
        let mut buf = [0u8; CONTRIBUTION_BYTES];
        buf[0..4].copy_from_slice(&self.index.to_le_bytes());
        buf[4..36].copy_from_slice(self.commitment.compress().as_bytes());
        buf[36..68].copy_from_slice(&self.response.to_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ThresholdError> {
        if bytes.len() != CONTRIBUTION_BYTES {
            return Err(ThresholdError::BadLength);
        }
        let mut index_bytes = [0u8; 4];
        index_bytes.copy_from_slice(&bytes[0..4]);
        let index = u32::from_le_bytes(index_bytes);
        if index == 0 {
            return Err(ThresholdError::InvalidIndex);
        }

        let mut point_bytes = [0u8; 32];
        point_bytes.copy_from_slice(&bytes[4..36]);
        let commitment = CompressedRistretto(point_bytes)
            .decompress()
            .ok_or(ThresholdError::InvalidPoint)?;

        let mut scalar_bytes = [0u8; 32];
        scalar_bytes.copy_from_slice(&bytes[36..68]);
        let response: Scalar = Option::from(Scalar::from_canonical_bytes(scalar_bytes))
            .ok_or(ThresholdError::InvalidScalar)?;

        Ok(Contribution {
            index,
            commitment,
            response,
        })
    }
}

impl Serialize for Contribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Contribution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Contribution::from_bytes(&bytes).map_err(D::Error::custom)
    }
}

/// Verify one contribution against its holder's public share:
/// `g^{s_i} = u_i · y_i^{c_i}`. This is what lets an aggregator discard a
/// Byzantine replica's garbage before attempting aggregation.
pub fn verify_partial(
    public_share: &RistrettoPoint,
    contribution: &Contribution,
    payload: &[u8],
) -> bool {
    let c = challenge(&contribution.commitment.compress(), payload);
    RistrettoPoint::mul_base(&contribution.response)
        == contribution.commitment + public_share * c
}

/// Lagrange coefficients at zero for a set of 1-indexed share indices,
/// using the common-denominator technique: one inversion total.
pub fn lagrange_coefficients(indices: &[u32]) -> Result<Vec<Scalar>, ThresholdError> {
    let k = indices.len();
    if k == 0 {
        return Err(ThresholdError::EmptyContributions);
    }
    for &idx in indices {
        if idx == 0 {
            return Err(ThresholdError::InvalidIndex);
        }
    }
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        if pair[0] == pair[1] {
            return Err(ThresholdError::DuplicateIndex(pair[0]));
        }
    }
    if k == 1 {
        return Ok(vec![Scalar::ONE]);
    }

    let scalars: Vec<Scalar> = indices.iter().map(|&i| Scalar::from(i)).collect();

    // ξ = Π j
    let xi = scalars.iter().fold(Scalar::ONE, |acc, x| acc * x);

    // d_i = i · Π_{j≠i} (j - i)
    let mut d_values = Vec::with_capacity(k);
    for i in 0..k {
        let mut d = scalars[i];
        for j in 0..k {
            if i != j {
                d *= scalars[j] - scalars[i];
            }
        }
        d_values.push(d);
    }

    // ρ_i = Π_{j≠i} d_j by forward-backward pass
    let mut rho = vec![Scalar::ONE; k];
    for i in 1..k {
        rho[i] = rho[i - 1] * d_values[i - 1];
    }
    let mut suffix = Scalar::ONE;
    for i in (0..k).rev() {
        rho[i] *= suffix;
        suffix *= d_values[i];
    }

    // λ_i = ξ · ρ_i · d̄^{-1}
    let delta = xi * suffix.invert();
    Ok(rho.iter().map(|rho_i| delta * rho_i).collect())
}

fn compute_weights(
    contributions: &[Contribution],
    payload: &[u8],
) -> Result<(Scalar, Vec<Scalar>), ThresholdError> {
    if contributions.is_empty() {
        return Err(ThresholdError::EmptyContributions);
    }
    let challenges: Vec<Scalar> = contributions
        .iter()
        .map(|c| challenge(&c.commitment.compress(), payload))
        .collect();
    if challenges.iter().any(|c| *c == Scalar::ZERO) {
        return Err(ThresholdError::ZeroChallenge);
    }

    let normalizer = challenges.iter().fold(Scalar::ONE, |acc, c| acc * c);

    let indices: Vec<u32> = contributions.iter().map(|c| c.index).collect();
    let lagrange = lagrange_coefficients(&indices)?;

    let weights = (0..contributions.len())
        .map(|i| {
            let mut weight = lagrange[i];
            for (j, c_j) in challenges.iter().enumerate() {
                if i != j {
                    weight *= c_j;
                }
            }
            weight
        })
        .collect();

    Ok((normalizer, weights))
}

/// Verify an aggregated contribution set against the group public key.
pub fn verify_aggregate(
    group_key: &RistrettoPoint,
    contributions: &[Contribution],
    threshold: u32,
    payload: &[u8],
) -> Result<bool, ThresholdError> {
    if contributions.len() < threshold as usize {
        return Err(ThresholdError::InsufficientContributions {
            got: contributions.len(),
            need: threshold as usize,
        });
    }
    let (normalizer, weights) = compute_weights(contributions, payload)?;

    let mut lhs_exponent = Scalar::ZERO;
    for (contribution, weight) in contributions.iter().zip(&weights) {
        lhs_exponent += weight * contribution.response;
    }
    let lhs = RistrettoPoint::mul_base(&lhs_exponent);

    let mut scalars = vec![normalizer];
    let mut points = vec![*group_key];
    for (contribution, weight) in contributions.iter().zip(&weights) {
        scalars.push(*weight);
        points.push(contribution.commitment);
    }
    let rhs = RistrettoPoint::multiscalar_mul(&scalars, &points);

    Ok(lhs == rhs)
}

/// Dealer-based Shamir split of a fresh group secret into `n` shares with
/// reconstruction threshold `t`. Returns the group public key and shares.
pub fn deal_shares<R: RngCore + CryptoRng>(
    rng: &mut R,
    n: u32,
    t: u32,
) -> (RistrettoPoint, Vec<SecretShare>) {
    assert!(t >= 1 && t <= n, "threshold must be within 1..=n");
    let mut coefficients = vec![Scalar::random(rng)];
    for _ in 1..t {
        coefficients.push(Scalar::random(rng));
    }
    let group_key = RistrettoPoint::mul_base(&coefficients[0]);

    let shares = (1..=n)
        .map(|i| {
            let x = Scalar::from(i);
            let mut y = Scalar::ZERO;
            let mut x_pow = Scalar::ONE;
            for coefficient in &coefficients {
                y += coefficient * x_pow;
                x_pow *= x;
            }
            SecretShare::new(i, y)
        })
        .collect();

    (group_key, shares)
}

/// Aggregated threshold signature as shipped to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSignature {
    pub group_key: PublicKey,
    pub threshold: u32,
    pub contributions: Vec<Contribution>,
}

impl ThresholdSignature {
    pub fn verify(&self, payload: &[u8]) -> Result<bool, ThresholdError> {
        let group_key = CompressedRistretto(self.group_key)
            .decompress()
            .ok_or(ThresholdError::InvalidPoint)?;
        verify_aggregate(&group_key, &self.contributions, self.threshold, payload)
    }
}
