//! ----------------------------------------------------------------------------
//! EXTERNAL PROVER: snarkjs
//! ----------------------------------------------------------------------------
//! Proving shells out to `snarkjs groth16 fullprove` over compiled circuit
//! artifacts; verification to `snarkjs groth16 verify`. Each call works in
//! its own scratch directory, removed when the call finishes or is dropped.
//!
//! Artifact layout under the configured directory:
//!
//! ```text
//! <circuit>.wasm         witness generator
//! <circuit>_final.zkey   proving key
//! <circuit>_vkey.json    verification key
//! ```
//! ----------------------------------------------------------------------------

use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};

use super::circuit::CircuitId;
use super::error::{ZkError, ZkResult};
use super::inputs::CircuitInput;
use super::proof::{Groth16Proof, ProofBundle};
use super::prover::ZkBackend;

/// `snarkjs`-backed prover and verifier.
#[derive(Debug, Clone)]
pub struct SnarkjsBackend {
    bin: String,
    artifacts_dir: PathBuf,
    scratch_root: PathBuf,
}

/// Per-call working directory, removed on drop.
struct ScratchDir(PathBuf);

impl ScratchDir {
    async fn create(root: &Path) -> ZkResult<Self> {
        let path = root.join(format!("zkgps-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await.map_err(|e| {
            ZkError::ProofGenerationFailed(format!(
                "Cannot create scratch directory {:?}: {}",
                path, e
            ))
        })?;
        Ok(Self(path))
    }

    fn file(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            debug!(path = %self.0.display(), error = %e, "Scratch directory cleanup failed");
        }
    }
}

impl SnarkjsBackend {
    /// Open the backend over an artifact directory.
    ///
    /// # Fail-Visible Pattern
    /// Every artifact of every circuit must exist. A missing file is an
    /// error with clear diagnostics; the backend never degrades to an
    /// unverified mode.
    pub fn initialize(bin: impl Into<String>, artifacts_dir: impl Into<PathBuf>) -> ZkResult<Self> {
        let backend = Self {
            bin: bin.into(),
            artifacts_dir: artifacts_dir.into(),
            scratch_root: std::env::temp_dir(),
        };

        for circuit in CircuitId::ALL {
            for file in [circuit.wasm_file(), circuit.zkey_file()] {
                let path = backend.artifacts_dir.join(&file);
                if !path.is_file() {
                    return Err(ZkError::ProvingKeyNotFound(format!(
                        "CRITICAL: ZK Artifacts missing at {:?}. Deployment unsafe.",
                        path
                    )));
                }
            }
            let vkey = backend.artifacts_dir.join(circuit.vkey_file());
            if !vkey.is_file() {
                return Err(ZkError::VerificationKeyNotFound(format!(
                    "CRITICAL: Verification key missing at {:?}. Deployment unsafe.",
                    vkey
                )));
            }
        }

        Ok(backend)
    }

    /// Place scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    fn artifact(&self, file: String) -> PathBuf {
        self.artifacts_dir.join(file)
    }

    async fn run(&self, args: &[&OsStr]) -> std::io::Result<Output> {
        Command::new(&self.bin)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
    }
}

fn stderr_summary(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    text.trim().lines().last().unwrap_or("no output").to_string()
}

async fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> ZkResult<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| ZkError::InvalidInput(format!("Cannot serialize {:?}: {}", path, e)))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| ZkError::ProofGenerationFailed(format!("Cannot write {:?}: {}", path, e)))
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> ZkResult<T> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ZkError::ProofGenerationFailed(format!("Cannot read {:?}: {}", path, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ZkError::ProofGenerationFailed(format!("Malformed {:?}: {}", path, e)))
}

#[async_trait]
impl ZkBackend for SnarkjsBackend {
    fn name(&self) -> &'static str {
        "snarkjs"
    }

    async fn prove(&self, input: &CircuitInput) -> ZkResult<ProofBundle> {
        let circuit = input.circuit();
        let wasm = self.artifact(circuit.wasm_file());
        let zkey = self.artifact(circuit.zkey_file());
        if !wasm.is_file() || !zkey.is_file() {
            return Err(ZkError::ProvingKeyNotFound(format!(
                "Circuit artifacts not found for {} in {:?}",
                circuit, self.artifacts_dir
            )));
        }

        let scratch = ScratchDir::create(&self.scratch_root).await?;
        let input_path = scratch.file("input.json");
        let proof_path = scratch.file("proof.json");
        let public_path = scratch.file("public.json");
        write_json(&input_path, input).await?;

        debug!(circuit = %circuit, "Running snarkjs groth16 fullprove");
        let output = self
            .run(&[
                OsStr::new("groth16"),
                OsStr::new("fullprove"),
                input_path.as_os_str(),
                wasm.as_os_str(),
                zkey.as_os_str(),
                proof_path.as_os_str(),
                public_path.as_os_str(),
            ])
            .await
            .map_err(|e| {
                ZkError::ProofGenerationFailed(format!("Cannot run {}: {}", self.bin, e))
            })?;

        if !output.status.success() {
            let reason = stderr_summary(&output);
            warn!(circuit = %circuit, reason = %reason, "snarkjs fullprove failed");
            return Err(ZkError::ProofGenerationFailed(reason));
        }

        let proof: Groth16Proof = read_json(&proof_path).await?;
        let public_signals: Vec<String> = read_json(&public_path).await?;
        Ok(ProofBundle {
            proof,
            public_signals,
        })
    }

    async fn verify(
        &self,
        circuit: CircuitId,
        public_signals: &[String],
        proof: &Groth16Proof,
    ) -> ZkResult<bool> {
        let vkey = self.artifact(circuit.vkey_file());
        if !vkey.is_file() {
            return Err(ZkError::VerificationKeyNotFound(format!(
                "Verification key not found for {} at {:?}",
                circuit, vkey
            )));
        }
        if proof.check_shape().is_err() {
            return Ok(false);
        }

        let scratch = ScratchDir::create(&self.scratch_root)
            .await
            .map_err(|e| ZkError::VerificationFailed(e.to_string()))?;
        let proof_path = scratch.file("proof.json");
        let public_path = scratch.file("public.json");
        write_json(&proof_path, proof)
            .await
            .map_err(|e| ZkError::VerificationFailed(e.to_string()))?;
        write_json(&public_path, public_signals)
            .await
            .map_err(|e| ZkError::VerificationFailed(e.to_string()))?;

        let output = self
            .run(&[
                OsStr::new("groth16"),
                OsStr::new("verify"),
                vkey.as_os_str(),
                public_path.as_os_str(),
                proof_path.as_os_str(),
            ])
            .await
            .map_err(|e| ZkError::VerificationFailed(format!("Cannot run {}: {}", self.bin, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let valid = output.status.success() && stdout.contains("OK");
        debug!(circuit = %circuit, valid, "snarkjs verify finished");
        Ok(valid)
    }
}
