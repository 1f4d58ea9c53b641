//! Remote helper command loop
//!
//! git drives the helper over stdin/stdout: `capabilities`, `list`,
//! `option`, then batches of `push` or `fetch` lines terminated by a blank
//! line. Every answer goes to the writer; diagnostics go through tracing
//! so stdout stays clean.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use git2::{Oid, Repository};
use libgitrow_core::PushUpdate;
use libgitrow_git::toolchain::{build_push_pack, has_object, index_pack, resolve_src};
use libgitrow_wire::{WireClient, WireError};
use tracing::{debug, info, warn};

use crate::error::HelperError;
use crate::protocol::{Command, ProtocolReader, ProtocolWriter, PushSpec};

pub struct RemoteHelper {
    client: WireClient,
    repo: Repository,
    /// Remote ref name to target, as of the last `list`
    remote_refs: HashMap<String, String>,
    verbosity: u32,
    progress: bool,
}

impl RemoteHelper {
    pub fn new(client: WireClient, repo: Repository) -> Self {
        Self {
            client,
            repo,
            remote_refs: HashMap::new(),
            verbosity: 1,
            progress: false,
        }
    }

    pub fn verbosity(&self) -> u32 {
        self.verbosity
    }

    /// Serve commands until git closes stdin
    pub async fn run<R: BufRead, W: Write>(
        &mut self,
        reader: &mut ProtocolReader<R>,
        writer: &mut ProtocolWriter<W>,
    ) -> Result<(), HelperError> {
        while let Some(command) = reader.read_command()? {
            match command {
                Command::Capabilities => writer.write_capabilities()?,
                Command::List { for_push } => self.list(writer, for_push).await?,
                Command::Option { name, value } => {
                    let supported = self.set_option(&name, &value);
                    writer.write_option_response(supported)?;
                }
                Command::Push(first) => {
                    let mut specs = vec![first];
                    for cmd in reader.read_batch()? {
                        match cmd {
                            Command::Push(spec) => specs.push(spec),
                            other => warn!(command = ?other, "ignoring non-push command in push batch"),
                        }
                    }
                    self.push(writer, &specs).await?;
                }
                Command::Fetch { oid, ref_name } => {
                    let mut wants = vec![(oid, ref_name)];
                    for cmd in reader.read_batch()? {
                        match cmd {
                            Command::Fetch { oid, ref_name } => wants.push((oid, ref_name)),
                            other => warn!(command = ?other, "ignoring non-fetch command in fetch batch"),
                        }
                    }
                    self.fetch(writer, &wants).await?;
                }
                Command::Empty => {
                    debug!("end of command stream");
                    break;
                }
                Command::Unknown(line) => {
                    warn!(line = %line, "unsupported command");
                    writer.write_end()?;
                }
            }
        }
        Ok(())
    }

    fn set_option(&mut self, name: &str, value: &str) -> bool {
        match name {
            "verbosity" => match value.parse() {
                Ok(level) => {
                    self.verbosity = level;
                    true
                }
                Err(_) => false,
            },
            "progress" => {
                self.progress = value == "true";
                true
            }
            _ => false,
        }
    }

    async fn list<W: Write>(
        &mut self,
        writer: &mut ProtocolWriter<W>,
        for_push: bool,
    ) -> Result<(), HelperError> {
        let response = self.client.list_refs().await?;
        debug!(refs = response.refs.len(), for_push, "listed remote refs");

        self.remote_refs.clear();
        for entry in &response.refs {
            writer.write_ref(&entry.target_sha, &entry.name)?;
            self.remote_refs
                .insert(entry.name.clone(), entry.target_sha.clone());
        }
        if let Some(head) = &response.head {
            writer.write_head_symref(&head.target)?;
        }
        writer.write_end()?;
        Ok(())
    }

    async fn push<W: Write>(
        &mut self,
        writer: &mut ProtocolWriter<W>,
        specs: &[PushSpec],
    ) -> Result<(), HelperError> {
        // Per-ref failures detected locally, keyed by destination
        let mut local_errors: HashMap<String, String> = HashMap::new();
        let mut updates = Vec::new();
        let mut wants: Vec<Oid> = Vec::new();

        for spec in specs {
            if spec.is_delete() {
                local_errors.insert(spec.dst.clone(), "deleting refs is not supported".to_string());
                continue;
            }
            match resolve_src(&self.repo, &spec.src) {
                Ok(oid) => {
                    wants.push(oid);
                    updates.push(PushUpdate::new(oid.to_string(), spec.dst.clone(), spec.force));
                }
                Err(e) => {
                    local_errors.insert(
                        spec.dst.clone(),
                        format!("src refspec {} does not resolve: {}", spec.src, e),
                    );
                }
            }
        }

        let remote: HashMap<String, Result<(), String>> = if updates.is_empty() {
            HashMap::new()
        } else {
            let have: Vec<String> = self.remote_refs.values().cloned().collect();
            let pack = build_push_pack(&self.repo, &wants, &have)?;
            if self.progress {
                eprintln!("gitrow: sending {} bytes for {} ref(s)", pack.len(), updates.len());
            }
            match self.client.push(&updates, &pack).await {
                Ok(outcome) => outcome
                    .results
                    .into_iter()
                    .map(|(name, result)| {
                        let verdict = if result.is_ok() {
                            Ok(())
                        } else {
                            Err(result.message.unwrap_or_else(|| "rejected".to_string()))
                        };
                        (name, verdict)
                    })
                    .collect(),
                Err(e @ WireError::Auth(_)) => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "push request failed");
                    let message = e.to_string();
                    updates
                        .iter()
                        .map(|u| (u.dst_ref.clone(), Err(message.clone())))
                        .collect()
                }
            }
        };

        let mut accepted = 0;
        for spec in specs {
            if let Some(message) = local_errors.get(&spec.dst) {
                writer.write_push_error(&spec.dst, message)?;
                continue;
            }
            match remote.get(&spec.dst) {
                Some(Ok(())) => {
                    accepted += 1;
                    writer.write_push_ok(&spec.dst)?;
                }
                Some(Err(message)) => writer.write_push_error(&spec.dst, message)?,
                None => writer.write_push_error(&spec.dst, "no result from server")?,
            }
        }
        writer.write_end()?;

        info!(refs = specs.len(), accepted, "push finished");
        Ok(())
    }

    async fn fetch<W: Write>(
        &mut self,
        writer: &mut ProtocolWriter<W>,
        wants: &[(String, String)],
    ) -> Result<(), HelperError> {
        let mut seen = Vec::new();
        for (oid, ref_name) in wants {
            if seen.contains(oid) {
                continue;
            }
            seen.push(oid.clone());
            if has_object(&self.repo, oid) {
                debug!(oid = %oid, ref_name = %ref_name, "object already present");
                continue;
            }
            match self.fetch_one(oid).await {
                Ok(true) => debug!(oid = %oid, ref_name = %ref_name, "fetched"),
                Ok(false) => warn!(oid = %oid, ref_name = %ref_name, "remote has no pack for object"),
                Err(HelperError::Auth(message)) => return Err(HelperError::Auth(message)),
                Err(e) => warn!(oid = %oid, ref_name = %ref_name, error = %e, "fetch failed"),
            }
        }
        writer.write_end()?;
        Ok(())
    }

    async fn fetch_one(&self, oid: &str) -> Result<bool, HelperError> {
        let Some(response) = self.client.fetch(Some(vec![oid.to_string()])).await? else {
            return Ok(false);
        };
        let bytes = response.pack_bytes()?;
        if self.progress {
            eprintln!("gitrow: received {} bytes", bytes.len());
        }
        index_pack(&self.repo, &bytes)?;
        Ok(true)
    }
}
