//! # Circuit Artifact
//!
//! The proof binder never touches a proving key directly. It calls a
//! [`CircuitArtifact`]: something that turns circuit inputs into
//! `(a, b, c, public_inputs)`. The shipped implementation,
//! [`Groth16Artifact`], holds a Groth16 proving key for
//! [`LearningOutcomeCircuit`] over BN254.
//!
//! 1. **Setup**: `Groth16Artifact::setup(params, rng)` runs a
//!    circuit-specific setup and returns the artifact together with the
//!    matching [`LearningProofVerifier`]. A deployment loads a ceremony key
//!    with [`Groth16Artifact::from_proving_key_bytes`] instead.
//!
//! 2. **Prove**: the witness is synthesized once into a throwaway
//!    constraint system and checked for satisfiability. ark-groth16 panics
//!    on an unsatisfiable witness, so an out-of-policy witness must be
//!    caught here and reported as [`ArtifactError::Unsatisfied`].

use anyhow::Context;
use ark_bn254::{Bn254, Fr, G1Affine, G2Affine};
use ark_groth16::{Groth16, ProvingKey};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystem, SynthesisError};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use ark_std::rand::{CryptoRng, Rng};

use super::circuit::{CircuitInputs, LearningOutcomeCircuit};
use super::commitment::CommitmentParams;
use super::verifier::LearningProofVerifier;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The witness does not satisfy the circuit. Names the first failing
    /// constraint when arkworks can tell.
    #[error("witness does not satisfy the circuit: {0}")]
    Unsatisfied(String),

    #[error("constraint synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("proving failed: {0}")]
    Proving(String),
}

/// What a circuit artifact hands back: the Groth16 points and the public
/// inputs they were proved against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawProof {
    pub a: G1Affine,
    pub b: G2Affine,
    pub c: G1Affine,
    pub public_inputs: Vec<Fr>,
}

/// A pre-compiled circuit: witness generator plus proving key.
///
/// Implementations are CPU-bound and are driven from the binder's blocking
/// worker pool.
pub trait CircuitArtifact: Send + Sync {
    fn generate_witness_and_proof(&self, inputs: &CircuitInputs) -> Result<RawProof, ArtifactError>;

    /// The commitment parameters the artifact's circuit was compiled with.
    fn params(&self) -> &CommitmentParams;
}

// ---------------------------------------------------------------------------
// Groth16Artifact
// ---------------------------------------------------------------------------

/// Groth16 proving key for [`LearningOutcomeCircuit`].
///
/// The commitment generators are circuit constants, so the key is only
/// valid for the parameter set it was generated with.
pub struct Groth16Artifact {
    pk: ProvingKey<Bn254>,
    params: CommitmentParams,
}

impl Groth16Artifact {
    /// Circuit-specific setup. Returns the prover and verifier halves.
    pub fn setup<R: Rng + CryptoRng>(
        params: CommitmentParams,
        rng: &mut R,
    ) -> Result<(Self, LearningProofVerifier), ArtifactError> {
        let blank = LearningOutcomeCircuit::blank(&params);
        let (pk, vk) = Groth16::<Bn254>::circuit_specific_setup(blank, rng)?;
        let verifier = LearningProofVerifier::from_vk(vk);
        Ok((Self { pk, params }, verifier))
    }

    pub fn from_proving_key_bytes(data: &[u8], params: CommitmentParams) -> anyhow::Result<Self> {
        let pk = ProvingKey::<Bn254>::deserialize_compressed(data)
            .context("failed to deserialize proving key")?;
        Ok(Self { pk, params })
    }

    pub fn proving_key_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.pk
            .serialize_compressed(&mut buf)
            .context("proving key serialization failed")?;
        Ok(buf)
    }

    /// The matching verifier, derived from the proving key.
    pub fn verifier(&self) -> LearningProofVerifier {
        LearningProofVerifier::from_vk(self.pk.vk.clone())
    }
}

impl CircuitArtifact for Groth16Artifact {
    fn generate_witness_and_proof(&self, inputs: &CircuitInputs) -> Result<RawProof, ArtifactError> {
        let circuit = LearningOutcomeCircuit::new(&self.params, inputs);

        let cs = ConstraintSystem::<Fr>::new_ref();
        circuit.clone().generate_constraints(cs.clone())?;
        if !cs.is_satisfied()? {
            let failing = cs
                .which_is_unsatisfied()?
                .unwrap_or_else(|| "unknown constraint".to_string());
            return Err(ArtifactError::Unsatisfied(failing));
        }

        let mut rng = ark_std::rand::thread_rng();
        let proof = Groth16::<Bn254>::prove(&self.pk, circuit, &mut rng)
            .map_err(|e| ArtifactError::Proving(e.to_string()))?;

        Ok(RawProof {
            a: proof.a,
            b: proof.b,
            c: proof.c,
            public_inputs: inputs.public_inputs(&self.params),
        })
    }

    fn params(&self) -> &CommitmentParams {
        &self.params
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
