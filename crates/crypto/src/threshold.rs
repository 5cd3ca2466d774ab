//! Threshold BLS over BLS12-381.
//!
//! Joint-Feldman DKG: every participant deals a random polynomial, broadcasts
//! a Feldman commitment to it, and sends each other participant an evaluation
//! share. The joint secret is the sum of all constant terms; it never exists
//! anywhere, but participant `i` holds the sum of the evaluations at `x_i`,
//! which is a Shamir share of it. Any `t` shares produce a signature via
//! Lagrange interpolation in the exponent.
//!
//! Keys live in G2, signatures in G1 (hash-to-curve).

use crate::CryptoError;
use blstrs::{G1Affine, G1Projective, G2Affine, G2Projective, Gt, Scalar};
use ff::Field;
use group::{Curve, Group};
use rand::RngCore;
use std::collections::BTreeMap;

/// Compressed G2 point length (commitment coefficients, public keys).
pub const COMMITMENT_POINT_LEN: usize = 96;
/// Compressed G1 point length (signatures).
const G1_POINT_LEN: usize = 48;
/// Big-endian scalar length (deals, shares).
pub const SCALAR_LEN: usize = 32;
/// Encoded partial signature length: 4-byte index plus compressed G1 point.
pub const PARTIAL_SIGNATURE_LEN: usize = 4 + G1_POINT_LEN;

const SIG_DST: &[u8] = b"CUSTODIA-BLS-SIG-V1";

/// Evaluation point for participant `index`: scalars 1..=n, never zero.
fn eval_point(index: u32) -> Scalar {
    Scalar::from(u64::from(index) + 1)
}

fn eval_poly(coeffs: &[Scalar], x: &Scalar) -> Scalar {
    let mut acc = Scalar::ZERO;
    for coeff in coeffs.iter().rev() {
        acc *= x;
        acc += coeff;
    }
    acc
}

fn eval_commitment(points: &[G2Projective], x: &Scalar) -> G2Projective {
    let mut acc = G2Projective::identity();
    let mut power = Scalar::ONE;
    for point in points {
        acc += *point * power;
        power *= x;
    }
    acc
}

fn pairing(g1: &G1Projective, g2: &G2Projective) -> Gt {
    blstrs::pairing(&g1.to_affine(), &g2.to_affine())
}

fn hash_to_g1(msg: &[u8]) -> G1Projective {
    G1Projective::hash_to_curve(msg, SIG_DST, &[])
}

fn g1_to_bytes(p: &G1Projective) -> [u8; G1_POINT_LEN] {
    p.to_affine().to_compressed()
}

fn g1_from_bytes(bytes: &[u8]) -> Result<G1Projective, CryptoError> {
    let raw: [u8; G1_POINT_LEN] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidShare("truncated G1 point".into()))?;
    Option::<G1Affine>::from(G1Affine::from_compressed(&raw))
        .map(G1Projective::from)
        .ok_or_else(|| CryptoError::InvalidShare("non-canonical G1 point".into()))
}

fn g2_to_bytes(p: &G2Projective) -> [u8; COMMITMENT_POINT_LEN] {
    p.to_affine().to_compressed()
}

fn g2_from_bytes(bytes: &[u8]) -> Result<G2Projective, CryptoError> {
    let raw: [u8; COMMITMENT_POINT_LEN] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidShare("truncated G2 point".into()))?;
    Option::<G2Affine>::from(G2Affine::from_compressed(&raw))
        .map(G2Projective::from)
        .ok_or_else(|| CryptoError::InvalidShare("non-canonical G2 point".into()))
}

fn scalar_to_bytes(s: &Scalar) -> [u8; SCALAR_LEN] {
    s.to_bytes_be()
}

fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar, CryptoError> {
    let raw: [u8; SCALAR_LEN] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidShare("truncated scalar".into()))?;
    Option::<Scalar>::from(Scalar::from_bytes_be(&raw))
        .ok_or_else(|| CryptoError::InvalidShare("non-canonical scalar".into()))
}

/// A participant's secret polynomial for one DKG round.
///
/// Never serialized by the node; it lives with the operator's signer.
pub struct DkgSecret {
    coeffs: Vec<Scalar>,
}

impl DkgSecret {
    /// Generate a random polynomial of degree `threshold - 1`.
    pub fn generate(threshold: u16, rng: &mut impl RngCore) -> Result<Self, CryptoError> {
        if threshold == 0 {
            return Err(CryptoError::Internal("threshold must be positive".into()));
        }
        let coeffs = (0..threshold).map(|_| Scalar::random(&mut *rng)).collect();
        Ok(Self { coeffs })
    }

    /// Feldman commitment: `C_k = g2 ^ a_k` for every coefficient.
    pub fn commitments(&self) -> Commitments {
        let g2 = G2Projective::generator();
        Commitments {
            points: self.coeffs.iter().map(|a| g2 * a).collect(),
        }
    }

    /// One evaluation share per participant index in `0..n`.
    pub fn deal_bundle(&self, n: u16) -> DealBundle {
        let deals = (0..u32::from(n))
            .map(|index| (index, eval_poly(&self.coeffs, &eval_point(index))))
            .collect();
        DealBundle { deals }
    }
}

/// Feldman commitment to a dealer's polynomial: `threshold` G2 points.
#[derive(Debug, Clone, PartialEq)]
pub struct Commitments {
    points: Vec<G2Projective>,
}

impl Commitments {
    pub fn count(&self) -> usize {
        self.points.len()
    }

    /// The dealer's contribution to the joint public key.
    fn constant_term(&self) -> G2Projective {
        self.points[0]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.points.len() * COMMITMENT_POINT_LEN);
        out.extend_from_slice(&(self.points.len() as u32).to_be_bytes());
        for point in &self.points {
            out.extend_from_slice(&g2_to_bytes(point));
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < 4 {
            return Err(CryptoError::InvalidShare("truncated commitments".into()));
        }
        let count = u32::from_be_bytes(bytes[..4].try_into().expect("length checked")) as usize;
        if count == 0 || bytes.len() != 4 + count * COMMITMENT_POINT_LEN {
            return Err(CryptoError::InvalidShare("malformed commitments".into()));
        }
        let mut points = Vec::with_capacity(count);
        for chunk in bytes[4..].chunks_exact(COMMITMENT_POINT_LEN) {
            points.push(g2_from_bytes(chunk)?);
        }
        Ok(Self { points })
    }
}

/// One dealer's evaluation shares, keyed by recipient index.
#[derive(Debug, Clone, PartialEq)]
pub struct DealBundle {
    deals: BTreeMap<u32, Scalar>,
}

impl DealBundle {
    pub fn recipients(&self) -> impl Iterator<Item = u32> + '_ {
        self.deals.keys().copied()
    }

    pub fn deal_for(&self, index: u32) -> Option<Scalar> {
        self.deals.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.deals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deals.is_empty()
    }

    /// Check one recipient's share against the dealer's commitments:
    /// `g2 ^ share == Σ C_k x_i^k`.
    pub fn verify_deal(
        commitments: &Commitments,
        index: u32,
        share: &Scalar,
    ) -> Result<(), CryptoError> {
        let lhs = G2Projective::generator() * share;
        let rhs = eval_commitment(&commitments.points, &eval_point(index));
        if lhs == rhs {
            Ok(())
        } else {
            Err(CryptoError::InvalidShare(format!(
                "deal for index {index} does not match commitments"
            )))
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.deals.len() * (4 + SCALAR_LEN));
        out.extend_from_slice(&(self.deals.len() as u32).to_be_bytes());
        for (index, share) in &self.deals {
            out.extend_from_slice(&index.to_be_bytes());
            out.extend_from_slice(&scalar_to_bytes(share));
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < 4 {
            return Err(CryptoError::InvalidShare("truncated deal bundle".into()));
        }
        let count = u32::from_be_bytes(bytes[..4].try_into().expect("length checked")) as usize;
        if bytes.len() != 4 + count * (4 + SCALAR_LEN) {
            return Err(CryptoError::InvalidShare("malformed deal bundle".into()));
        }
        let mut deals = BTreeMap::new();
        for chunk in bytes[4..].chunks_exact(4 + SCALAR_LEN) {
            let index = u32::from_be_bytes(chunk[..4].try_into().expect("length checked"));
            let share = scalar_from_bytes(&chunk[4..])?;
            if deals.insert(index, share).is_some() {
                return Err(CryptoError::InvalidShare(format!(
                    "duplicate deal for index {index}"
                )));
            }
        }
        Ok(Self { deals })
    }
}

/// A participant's per-dealer verdicts after checking its deals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBundle {
    verdicts: BTreeMap<u32, bool>,
}

impl ResponseBundle {
    pub fn new(verdicts: BTreeMap<u32, bool>) -> Self {
        Self { verdicts }
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    /// Dealer indices this participant rejected.
    pub fn rejected(&self) -> impl Iterator<Item = u32> + '_ {
        self.verdicts
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(index, _)| *index)
    }

    pub fn all_accepted(&self) -> bool {
        self.verdicts.values().all(|ok| *ok)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.verdicts.len() * 5);
        out.extend_from_slice(&(self.verdicts.len() as u32).to_be_bytes());
        for (index, ok) in &self.verdicts {
            out.extend_from_slice(&index.to_be_bytes());
            out.push(u8::from(*ok));
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < 4 {
            return Err(CryptoError::InvalidShare("truncated response bundle".into()));
        }
        let count = u32::from_be_bytes(bytes[..4].try_into().expect("length checked")) as usize;
        if bytes.len() != 4 + count * 5 {
            return Err(CryptoError::InvalidShare("malformed response bundle".into()));
        }
        let mut verdicts = BTreeMap::new();
        for chunk in bytes[4..].chunks_exact(5) {
            let index = u32::from_be_bytes(chunk[..4].try_into().expect("length checked"));
            let ok = match chunk[4] {
                0 => false,
                1 => true,
                _ => {
                    return Err(CryptoError::InvalidShare("malformed verdict byte".into()));
                }
            };
            verdicts.insert(index, ok);
        }
        Ok(Self { verdicts })
    }
}

/// The joint public key, identical across all honest participants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasterPublicKey(G2Projective);

impl MasterPublicKey {
    /// Sum of every qualified dealer's constant term.
    pub fn from_commitments<'a>(
        all: impl IntoIterator<Item = &'a Commitments>,
    ) -> Result<Self, CryptoError> {
        let mut acc = G2Projective::identity();
        let mut any = false;
        for commitments in all {
            acc += commitments.constant_term();
            any = true;
        }
        if !any {
            return Err(CryptoError::Internal("no commitments supplied".into()));
        }
        Ok(Self(acc))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        g2_to_bytes(&self.0).to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self(g2_from_bytes(bytes)?))
    }
}

/// Participant `index`'s share of the joint secret: the sum of every dealer's
/// evaluation at `x_index`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyShare {
    index: u32,
    secret: Scalar,
}

impl KeyShare {
    pub fn assemble<'a>(
        index: u32,
        deals_to_me: impl IntoIterator<Item = &'a Scalar>,
    ) -> Result<Self, CryptoError> {
        let mut secret = Scalar::ZERO;
        let mut any = false;
        for share in deals_to_me {
            secret += share;
            any = true;
        }
        if !any {
            return Err(CryptoError::Internal("no deals supplied".into()));
        }
        Ok(Self { index, secret })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + SCALAR_LEN);
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(&scalar_to_bytes(&self.secret));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 4 + SCALAR_LEN {
            return Err(CryptoError::InvalidShare("malformed key share".into()));
        }
        Ok(Self {
            index: u32::from_be_bytes(bytes[..4].try_into().expect("length checked")),
            secret: scalar_from_bytes(&bytes[4..])?,
        })
    }
}

/// One participant's contribution to a threshold signature.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialSignature {
    index: u32,
    point: G1Projective,
}

impl PartialSignature {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PARTIAL_SIGNATURE_LEN);
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(&g1_to_bytes(&self.point));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PARTIAL_SIGNATURE_LEN {
            return Err(CryptoError::InvalidShare("malformed partial signature".into()));
        }
        Ok(Self {
            index: u32::from_be_bytes(bytes[..4].try_into().expect("length checked")),
            point: g1_from_bytes(&bytes[4..])?,
        })
    }
}

/// Sign `msg` with a key share: `H(msg) ^ share`.
pub fn partial_sign(share: &KeyShare, msg: &[u8]) -> PartialSignature {
    PartialSignature {
        index: share.index,
        point: hash_to_g1(msg) * share.secret,
    }
}

/// The public key of participant `index`'s share, derived from everyone's
/// commitments: `Σ_dealers eval(C_dealer, x_index)`.
fn share_public_key<'a>(
    all: impl IntoIterator<Item = &'a Commitments>,
    index: u32,
) -> Result<G2Projective, CryptoError> {
    let x = eval_point(index);
    let mut acc = G2Projective::identity();
    let mut any = false;
    for commitments in all {
        acc += eval_commitment(&commitments.points, &x);
        any = true;
    }
    if !any {
        return Err(CryptoError::Internal("no commitments supplied".into()));
    }
    Ok(acc)
}

/// Verify a partial signature against the round's commitments.
pub fn verify_partial<'a>(
    all_commitments: impl IntoIterator<Item = &'a Commitments>,
    msg: &[u8],
    partial: &PartialSignature,
) -> Result<(), CryptoError> {
    let share_pub = share_public_key(all_commitments, partial.index)?;
    let lhs = pairing(&partial.point, &G2Projective::generator());
    let rhs = pairing(&hash_to_g1(msg), &share_pub);
    if lhs == rhs {
        Ok(())
    } else {
        Err(CryptoError::InvalidSignature)
    }
}

/// Lagrange coefficient at zero for `x_i` over the set `xs`.
fn lagrange_at_zero(xs: &[Scalar], i: usize) -> Result<Scalar, CryptoError> {
    let mut num = Scalar::ONE;
    let mut den = Scalar::ONE;
    for (j, x_j) in xs.iter().enumerate() {
        if j == i {
            continue;
        }
        num *= x_j;
        den *= x_j - xs[i];
    }
    let inv = Option::<Scalar>::from(den.invert())
        .ok_or_else(|| CryptoError::Internal("duplicate evaluation points".into()))?;
    Ok(num * inv)
}

/// Combine exactly `t` partial signatures into the joint signature.
///
/// The caller chooses which partials participate; the tie-break order (first
/// `t` valid partials by lexicographic sender address) is decided by the FSM.
pub fn aggregate(partials: &[PartialSignature]) -> Result<Vec<u8>, CryptoError> {
    if partials.is_empty() {
        return Err(CryptoError::Internal("no partials supplied".into()));
    }
    let xs: Vec<Scalar> = partials.iter().map(|p| eval_point(p.index)).collect();
    let mut acc = G1Projective::identity();
    for (i, partial) in partials.iter().enumerate() {
        acc += partial.point * lagrange_at_zero(&xs, i)?;
    }
    Ok(g1_to_bytes(&acc).to_vec())
}

/// Verify an aggregated signature against the joint public key.
pub fn verify_master_signature(
    master: &MasterPublicKey,
    msg: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let sig = g1_from_bytes(signature).map_err(|_| CryptoError::InvalidSignature)?;
    let lhs = pairing(&sig, &G2Projective::generator());
    let rhs = pairing(&hash_to_g1(msg), &master.0);
    if lhs == rhs {
        Ok(())
    } else {
        Err(CryptoError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const N: u16 = 4;
    const T: u16 = 2;

    struct Ceremony {
        commitments: Vec<Commitments>,
        shares: Vec<KeyShare>,
        master: MasterPublicKey,
    }

    fn run_ceremony(seed: u64) -> Ceremony {
        let mut rng = StdRng::seed_from_u64(seed);
        let secrets: Vec<DkgSecret> = (0..N)
            .map(|_| DkgSecret::generate(T, &mut rng).unwrap())
            .collect();
        let commitments: Vec<Commitments> = secrets.iter().map(|s| s.commitments()).collect();
        let bundles: Vec<DealBundle> = secrets.iter().map(|s| s.deal_bundle(N)).collect();

        // Every participant verifies every deal addressed to them.
        for (dealer, bundle) in bundles.iter().enumerate() {
            for index in 0..u32::from(N) {
                let share = bundle.deal_for(index).unwrap();
                DealBundle::verify_deal(&commitments[dealer], index, &share).unwrap();
            }
        }

        let shares: Vec<KeyShare> = (0..u32::from(N))
            .map(|index| {
                let deals: Vec<Scalar> =
                    bundles.iter().map(|b| b.deal_for(index).unwrap()).collect();
                KeyShare::assemble(index, deals.iter()).unwrap()
            })
            .collect();
        let master = MasterPublicKey::from_commitments(commitments.iter()).unwrap();
        Ceremony {
            commitments,
            shares,
            master,
        }
    }

    #[test]
    fn joint_key_signs_with_any_t_shares() {
        let ceremony = run_ceremony(7);
        let msg = b"withdrawal credentials rotation";

        // Participants 1 and 3 sign; 0 and 2 stay offline.
        let partials = vec![
            partial_sign(&ceremony.shares[1], msg),
            partial_sign(&ceremony.shares[3], msg),
        ];
        for partial in &partials {
            verify_partial(ceremony.commitments.iter(), msg, partial).unwrap();
        }
        let sig = aggregate(&partials).unwrap();
        verify_master_signature(&ceremony.master, msg, &sig).unwrap();

        // A different quorum produces the same valid signature.
        let other = aggregate(&[
            partial_sign(&ceremony.shares[0], msg),
            partial_sign(&ceremony.shares[2], msg),
        ])
        .unwrap();
        assert_eq!(sig, other);
    }

    #[test]
    fn tampered_partial_is_rejected() {
        let ceremony = run_ceremony(11);
        let msg = b"payload";
        let good = partial_sign(&ceremony.shares[0], msg);

        let mut bytes = good.to_bytes();
        bytes[PARTIAL_SIGNATURE_LEN - 1] ^= 1;
        match PartialSignature::from_bytes(&bytes) {
            // Bit flip produced a non-canonical encoding: rejected at decode.
            Err(CryptoError::InvalidShare(_)) => {}
            Ok(decoded) => {
                assert!(verify_partial(ceremony.commitments.iter(), msg, &decoded).is_err());
            }
            Err(other) => panic!("unexpected error: {other}"),
        }

        // A partial over a different message never verifies.
        let wrong_msg = partial_sign(&ceremony.shares[0], b"other payload");
        assert!(verify_partial(ceremony.commitments.iter(), msg, &wrong_msg).is_err());
    }

    #[test]
    fn bad_deal_fails_commitment_check() {
        let mut rng = StdRng::seed_from_u64(3);
        let secret = DkgSecret::generate(T, &mut rng).unwrap();
        let commitments = secret.commitments();
        let bundle = secret.deal_bundle(N);

        let good = bundle.deal_for(2).unwrap();
        DealBundle::verify_deal(&commitments, 2, &good).unwrap();

        let bad = good + Scalar::ONE;
        assert!(DealBundle::verify_deal(&commitments, 2, &bad).is_err());
        // Right share, wrong recipient index.
        assert!(DealBundle::verify_deal(&commitments, 3, &good).is_err());
    }

    #[test]
    fn artifacts_round_trip_through_bytes() {
        let ceremony = run_ceremony(5);
        let commitments = &ceremony.commitments[0];
        assert_eq!(
            Commitments::from_bytes(&commitments.to_bytes()).unwrap(),
            *commitments
        );

        let mut rng = StdRng::seed_from_u64(9);
        let bundle = DkgSecret::generate(T, &mut rng).unwrap().deal_bundle(N);
        assert_eq!(DealBundle::from_bytes(&bundle.to_bytes()).unwrap(), bundle);

        let responses =
            ResponseBundle::new((0..u32::from(N)).map(|i| (i, i != 2)).collect());
        let decoded = ResponseBundle::from_bytes(&responses.to_bytes()).unwrap();
        assert_eq!(decoded, responses);
        assert_eq!(decoded.rejected().collect::<Vec<_>>(), vec![2]);

        assert_eq!(
            MasterPublicKey::from_bytes(&ceremony.master.to_bytes()).unwrap(),
            ceremony.master
        );

        let share = &ceremony.shares[1];
        assert_eq!(KeyShare::from_bytes(&share.to_bytes()).unwrap(), *share);

        let partial = partial_sign(share, b"m");
        assert_eq!(
            PartialSignature::from_bytes(&partial.to_bytes()).unwrap(),
            partial
        );
    }

    #[test]
    fn master_key_is_identical_across_orderings() {
        let ceremony = run_ceremony(13);
        let mut reversed = ceremony.commitments.clone();
        reversed.reverse();
        let master = MasterPublicKey::from_commitments(reversed.iter()).unwrap();
        assert_eq!(master, ceremony.master);
    }
}
