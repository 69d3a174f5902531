//! # Learning-Outcome R1CS Circuit
//!
//! The statement being proved:
//!
//! ```text
//! "I know (time, attempts) such that:
//!     1. c = score·g_score + time·g_time + attempts·g_attempts
//!          + student·g_student + session·g_session + purpose·g_purpose
//!          + r·h                                  (commitment opens)
//!     2. score    >= min_score
//!     3. time     <= max_time
//!     4. attempts <= max_attempts"
//! ```
//!
//! `score`, the thresholds, the session and student field elements, the
//! purpose and the blinding `r` are public; time spent and attempts stay
//! private.
//!
//! ## Blinding
//!
//! `r` is a public input and verifiers require it to equal the session's
//! derived blinding. The commitment is linear in Fr, so with a free `r`
//! a prover could re-solve `r' = r + (time - time')·g_time / h` and open
//! the same commitment to any time spent.
//!
//! ## Range checks
//!
//! Each inequality becomes a non-negative difference that is bit-decomposed
//! into [`RANGE_BITS`] boolean witnesses and recomposed:
//!
//! ```text
//! score - min_score      in [0, 2^32)
//! max_time - time        in [0, 2^32)
//! max_attempts - attempts in [0, 2^32)
//! time, attempts          in [0, 2^32)
//! ```
//!
//! A negative difference wraps to a value near the field modulus, which has
//! no 32-bit decomposition, so an out-of-policy witness simply does not
//! satisfy the system. No service-layer check is involved.
//!
//! ## Public inputs
//!
//! Allocation order matches [`super::proof`]'s `PI_*` indices.

use ark_bn254::Fr;
use ark_ff::PrimeField;
use ark_r1cs_std::{
    alloc::AllocVar,
    boolean::Boolean,
    eq::EqGadget,
    fields::{fp::FpVar, FieldVar},
};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};

use super::commitment::{CommitmentOpening, CommitmentParams};
use super::proof::{ProofPolicy, PUBLIC_INPUT_COUNT};
use crate::config::RANGE_BITS;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Everything the prover needs: the commitment opening and the policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitInputs {
    pub opening: CommitmentOpening,
    pub policy: ProofPolicy,
}

impl CircuitInputs {
    /// Public inputs in allocation order.
    pub fn public_inputs(&self, params: &CommitmentParams) -> Vec<Fr> {
        let inputs = vec![
            params.commit(&self.opening),
            self.opening.session,
            self.opening.student,
            Fr::from(self.opening.score),
            Fr::from(self.policy.min_score),
            Fr::from(self.policy.max_time_seconds),
            Fr::from(self.policy.max_attempts),
            self.opening.purpose.field_element(),
            self.opening.blinding,
        ];
        debug_assert_eq!(inputs.len(), PUBLIC_INPUT_COUNT);
        inputs
    }
}

// ---------------------------------------------------------------------------
// Circuit definition
// ---------------------------------------------------------------------------

/// All fields are `Option<_>` so the same struct serves key generation
/// (no witness) and proving.
#[derive(Clone)]
pub struct LearningOutcomeCircuit {
    // -- Constants -----------------------------------------------------------
    pub params: CommitmentParams,

    // -- Private witness -----------------------------------------------------
    pub time_spent: Option<Fr>,
    pub attempts: Option<Fr>,

    // -- Public inputs -------------------------------------------------------
    pub commitment: Option<Fr>,
    pub session: Option<Fr>,
    pub student: Option<Fr>,
    pub score: Option<Fr>,
    pub min_score: Option<Fr>,
    pub max_time: Option<Fr>,
    pub max_attempts: Option<Fr>,
    pub purpose: Option<Fr>,
    pub blinding: Option<Fr>,
}

impl LearningOutcomeCircuit {
    pub fn new(params: &CommitmentParams, inputs: &CircuitInputs) -> Self {
        let o = &inputs.opening;
        Self {
            params: params.clone(),
            time_spent: Some(Fr::from(o.time_spent_seconds)),
            attempts: Some(Fr::from(o.attempts)),
            blinding: Some(o.blinding),
            commitment: Some(params.commit(o)),
            session: Some(o.session),
            student: Some(o.student),
            score: Some(Fr::from(o.score)),
            min_score: Some(Fr::from(inputs.policy.min_score)),
            max_time: Some(Fr::from(inputs.policy.max_time_seconds)),
            max_attempts: Some(Fr::from(inputs.policy.max_attempts)),
            purpose: Some(o.purpose.field_element()),
        }
    }

    /// Witness-free circuit for CRS generation. Same constraint topology.
    pub fn blank(params: &CommitmentParams) -> Self {
        Self {
            params: params.clone(),
            time_spent: None,
            attempts: None,
            blinding: None,
            commitment: None,
            session: None,
            student: None,
            score: None,
            min_score: None,
            max_time: None,
            max_attempts: None,
            purpose: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Constraint synthesizer
// ---------------------------------------------------------------------------

impl ConstraintSynthesizer<Fr> for LearningOutcomeCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        // ===================================================================
        // 1. Public inputs, in PI_* order
        // ===================================================================

        let input = |value: Option<Fr>| {
            FpVar::<Fr>::new_input(cs.clone(), || {
                value.ok_or(SynthesisError::AssignmentMissing)
            })
        };
        let commitment_var = input(self.commitment)?;
        let session_var = input(self.session)?;
        let student_var = input(self.student)?;
        let score_var = input(self.score)?;
        let min_score_var = input(self.min_score)?;
        let max_time_var = input(self.max_time)?;
        let max_attempts_var = input(self.max_attempts)?;
        let purpose_var = input(self.purpose)?;
        let blinding_var = input(self.blinding)?;

        // ===================================================================
        // 2. Private witnesses
        // ===================================================================

        let time_var = FpVar::<Fr>::new_witness(ark_relations::ns!(cs, "time_spent"), || {
            self.time_spent.ok_or(SynthesisError::AssignmentMissing)
        })?;
        let attempts_var = FpVar::<Fr>::new_witness(ark_relations::ns!(cs, "attempts"), || {
            self.attempts.ok_or(SynthesisError::AssignmentMissing)
        })?;

        // ===================================================================
        // 3. Commitment opens
        // ===================================================================

        let p = &self.params;
        let constant = |value: Fr| FpVar::<Fr>::new_constant(cs.clone(), value);
        let g_score = constant(p.g_score)?;
        let g_time = constant(p.g_time)?;
        let g_attempts = constant(p.g_attempts)?;
        let g_student = constant(p.g_student)?;
        let g_session = constant(p.g_session)?;
        let g_purpose = constant(p.g_purpose)?;
        let h = constant(p.h)?;

        let computed = &score_var * &g_score
            + &time_var * &g_time
            + &attempts_var * &g_attempts
            + &student_var * &g_student
            + &session_var * &g_session
            + &purpose_var * &g_purpose
            + &blinding_var * &h;
        computed.enforce_equal(&commitment_var)?;

        // ===================================================================
        // 4. Policy as range checks
        // ===================================================================

        enforce_range(
            cs.clone(),
            &(&score_var - &min_score_var),
            difference(self.score, self.min_score),
        )?;
        enforce_range(
            cs.clone(),
            &(&max_time_var - &time_var),
            difference(self.max_time, self.time_spent),
        )?;
        enforce_range(
            cs.clone(),
            &(&max_attempts_var - &attempts_var),
            difference(self.max_attempts, self.attempts),
        )?;
        enforce_range(cs.clone(), &time_var, self.time_spent)?;
        enforce_range(cs, &attempts_var, self.attempts)?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Constrain `var` to `[0, 2^RANGE_BITS)` by bit decomposition.
/// `value` is the witness assignment for `var` (None during setup).
fn enforce_range(
    cs: ConstraintSystemRef<Fr>,
    var: &FpVar<Fr>,
    value: Option<Fr>,
) -> Result<(), SynthesisError> {
    let bits = value.map(low_bits);

    let mut reconstructed = FpVar::<Fr>::zero();
    let mut power_of_two = FpVar::<Fr>::one();
    let two = FpVar::<Fr>::constant(Fr::from(2u64));

    for i in 0..RANGE_BITS {
        let bit = Boolean::<Fr>::new_witness(ark_relations::ns!(cs, "range_bit"), || {
            bits.as_ref()
                .map(|b| b[i])
                .ok_or(SynthesisError::AssignmentMissing)
        })?;
        reconstructed += FpVar::<Fr>::from(bit) * &power_of_two;
        power_of_two *= &two;
    }

    reconstructed.enforce_equal(var)
}

fn difference(lhs: Option<Fr>, rhs: Option<Fr>) -> Option<Fr> {
    Some(lhs? - rhs?)
}

/// Little-endian low `RANGE_BITS` bits of a field element.
fn low_bits(value: Fr) -> Vec<bool> {
    value
        .into_bigint()
        .0
        .iter()
        .flat_map(|limb| (0..64).map(move |i| (limb >> i) & 1 == 1))
        .take(RANGE_BITS)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zkp::proof::{ProofPurpose, PI_BLINDING};
    use ark_relations::r1cs::ConstraintSystem;

    fn opening(score: u32, time: u32, attempts: u32) -> CommitmentOpening {
        CommitmentOpening {
            score,
            time_spent_seconds: time,
            attempts,
            student: Fr::from(1111u64),
            session: Fr::from(2222u64),
            purpose: ProofPurpose::Module,
            blinding: Fr::from(3333u64),
        }
    }

    fn policy(min_score: u32, max_time: u32, max_attempts: u32) -> ProofPolicy {
        ProofPolicy {
            min_score,
            max_time_seconds: max_time,
            max_attempts,
        }
    }

    fn satisfied(circuit: LearningOutcomeCircuit) -> bool {
        let cs = ConstraintSystem::<Fr>::new_ref();
        circuit.generate_constraints(cs.clone()).unwrap();
        cs.is_satisfied().unwrap()
    }

    fn build(o: CommitmentOpening, p: ProofPolicy) -> LearningOutcomeCircuit {
        LearningOutcomeCircuit::new(&CommitmentParams::standard(), &CircuitInputs { opening: o, policy: p })
    }

    #[test]
    fn circuit_satisfiable_in_policy() {
        assert!(satisfied(build(opening(85, 3500, 3), policy(80, 3600, 10))));
    }

    #[test]
    fn circuit_satisfiable_at_exact_bounds() {
        assert!(satisfied(build(opening(80, 3600, 10), policy(80, 3600, 10))));
        assert!(satisfied(build(opening(0, 0, 0), policy(0, 0, 0))));
    }

    #[test]
    fn circuit_rejects_low_score() {
        assert!(!satisfied(build(opening(70, 3500, 3), policy(80, 3600, 10))));
        assert!(!satisfied(build(opening(85, 3500, 3), policy(90, 3600, 10))));
    }

    #[test]
    fn circuit_rejects_too_much_time() {
        assert!(!satisfied(build(opening(85, 3601, 3), policy(80, 3600, 10))));
    }

    #[test]
    fn circuit_rejects_too_many_attempts() {
        assert!(!satisfied(build(opening(85, 3500, 11), policy(80, 3600, 10))));
    }

    #[test]
    fn circuit_rejects_forged_commitment() {
        let mut circuit = build(opening(85, 3500, 3), policy(80, 3600, 10));
        // Claim the commitment of a different student.
        let mut other = opening(85, 3500, 3);
        other.student = Fr::from(9999u64);
        circuit.commitment = Some(CommitmentParams::standard().commit(&other));
        assert!(!satisfied(circuit));
    }

    #[test]
    fn circuit_rejects_swapped_public_student() {
        // Public student input no longer matches what the commitment opens to.
        let mut circuit = build(opening(85, 3500, 3), policy(80, 3600, 10));
        circuit.student = Some(Fr::from(4444u64));
        assert!(!satisfied(circuit));
    }

    #[test]
    fn circuit_rejects_time_shifted_into_blinding() {
        let params = CommitmentParams::standard();
        let honest = opening(85, 5000, 3);
        let limits = policy(80, 3600, 10);
        assert!(!satisfied(build(honest, limits)));

        // Re-solve the blinding so a zero time spent opens the same commitment.
        let mut forged = honest;
        forged.time_spent_seconds = 0;
        forged.blinding = honest.blinding + Fr::from(5000u64) * params.g_time / params.h;
        assert_eq!(params.commit(&forged), params.commit(&honest));

        // Satisfiable only against a public blinding that differs from the session's.
        let forged_inputs = CircuitInputs { opening: forged, policy: limits };
        assert_ne!(forged_inputs.public_inputs(&params)[PI_BLINDING], honest.blinding);

        // Against the session's own public inputs there is no witness.
        let mut circuit = build(forged, limits);
        circuit.blinding = Some(honest.blinding);
        assert!(!satisfied(circuit));
    }

    #[test]
    fn public_inputs_match_allocation_order() {
        let params = CommitmentParams::standard();
        let inputs = CircuitInputs {
            opening: opening(85, 3500, 3),
            policy: policy(80, 3600, 10),
        };
        let public = inputs.public_inputs(&params);
        assert_eq!(public.len(), PUBLIC_INPUT_COUNT);

        let cs = ConstraintSystem::<Fr>::new_ref();
        LearningOutcomeCircuit::new(&params, &inputs)
            .generate_constraints(cs.clone())
            .unwrap();
        // Instance assignment starts with the constant one.
        let assigned = cs.borrow().unwrap().instance_assignment.clone();
        assert_eq!(&assigned[1..], public.as_slice());
    }

    #[test]
    fn circuit_constraint_count() {
        let cs = ConstraintSystem::<Fr>::new_ref();
        build(opening(85, 3500, 3), policy(80, 3600, 10))
            .generate_constraints(cs.clone())
            .unwrap();
        let n = cs.num_constraints();
        // Five 32-bit range checks dominate.
        assert!(n > 5 * RANGE_BITS, "too few constraints ({n})");
        assert!(n < 600, "circuit bloat ({n} constraints)");
    }
}
