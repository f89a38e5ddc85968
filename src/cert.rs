//! Module implement certs, signed name/value assertions over revisions.
//!
//! A cert states `name = value` about a revision and is signed with an
//! Ed25519 key. Public keys live in the `public_keys` relation keyed by
//! the hash of their key data; verification goes through a read-mostly
//! cache holding the verifying key together with its identifier, so a
//! verifier can never outlive the key it belongs to. Certs are
//! append-only; whether a cert is believed is decided by a trust
//! callback supplied from above, refer [erase_bogus_certs].

use cbordata::Cborize;
use ed25519_dalek::{Keypair, PublicKey, Signature, Signer, Verifier};

use std::{collections::HashMap, convert::TryFrom};

use crate::{
    hash::{CertId, Hash, KeyId, RevisionId},
    pile::{self, Pile},
    util, Monitor, Result,
};

const CERT_ROW_VER: u32 = 0x0040_0001;
const KEY_ROW_VER: u32 = 0x0040_0002;

pub type CertName = String;
pub type CertValue = String;

/// Reserved cert name carrying branch membership.
pub const BRANCH_CERT: &str = "branch";

/// A signed assertion about a revision.
#[derive(Clone, Debug, PartialEq)]
pub struct Cert {
    pub ident: RevisionId,
    pub name: CertName,
    pub value: CertValue,
    pub key: KeyId,
    pub sig: Vec<u8>,
}

#[derive(Clone, Debug, Cborize)]
struct CertRow {
    ident: Vec<u8>,
    name: String,
    value: String,
    keypair: Vec<u8>,
    signature: Vec<u8>,
}

impl CertRow {
    const ID: u32 = CERT_ROW_VER;
}

#[derive(Clone, Debug, Cborize)]
struct KeyRow {
    name: String,
    data: Vec<u8>,
}

impl KeyRow {
    const ID: u32 = KEY_ROW_VER;
}

impl Cert {
    /// The byte string that is signed: key, revision, name and value
    /// in a fixed bracketed layout.
    pub fn signable_text(
        key: &KeyId,
        ident: &RevisionId,
        name: &str,
        value: &str,
    ) -> Vec<u8> {
        let text = format!("[{}@{}:{}:{}]", key.to_hex(), ident.to_hex(), name, value);
        text.into_bytes()
    }

    /// Build and sign a cert with `keypair`, whose public half is
    /// stored under `key`.
    pub fn make(
        ident: RevisionId,
        name: &str,
        value: &str,
        key: KeyId,
        keypair: &Keypair,
    ) -> Cert {
        let text = Cert::signable_text(&key, &ident, name, value);
        let sig = keypair.sign(&text).to_bytes().to_vec();
        Cert { ident, name: name.to_string(), value: value.to_string(), key, sig }
    }

    /// The cert's identifier, primary key in storage. Covers the
    /// signature so independently signed copies of the same assertion
    /// store separately.
    pub fn id(&self) -> CertId {
        let mut data = Cert::signable_text(&self.key, &self.ident, &self.name, &self.value);
        data.extend_from_slice(&self.sig);
        CertId::digest(&data)
    }

    fn to_row(&self) -> CertRow {
        CertRow {
            ident: self.ident.inner().to_bytes(),
            name: self.name.clone(),
            value: self.value.clone(),
            keypair: self.key.inner().to_bytes(),
            signature: self.sig.clone(),
        }
    }

    fn from_row(row: CertRow) -> Result<Cert> {
        Ok(Cert {
            ident: RevisionId::from(Hash::from_bytes(&row.ident)?),
            name: row.name,
            value: row.value,
            key: KeyId::from(Hash::from_bytes(&row.keypair)?),
            sig: row.signature,
        })
    }
}

/// Store a public key, returning its identifier. Idempotent.
pub fn put_key(pile: &mut Pile, name: &str, public: &PublicKey) -> Result<KeyId> {
    let data = public.to_bytes().to_vec();
    let id = KeyId::digest(&data);
    if !pile.exists("public_keys", &id.inner().to_bytes())? {
        let row = KeyRow { name: name.to_string(), data };
        pile.set("public_keys", &id.inner().to_bytes(), &util::into_cbor_bytes(row)?)?;
    }
    Ok(id)
}

/// Fetch a stored public key and its name.
pub fn get_key(pile: &Pile, id: &KeyId) -> Result<(String, PublicKey)> {
    let value = match pile.get("public_keys", &id.inner().to_bytes())? {
        Some(value) => value,
        None => err_at!(NotFound, msg: "no public key {}", id)?,
    };
    let row = util::from_cbor_bytes::<KeyRow>(&value)?.0;
    let public = err_at!(Corrupt, PublicKey::from_bytes(&row.data), "key {}", id)?;
    Ok((row.name, public))
}

/// Outcome of verifying one cert signature.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SigCheck {
    Good,
    Bad,
    /// The signing key is not in the store.
    Unknown,
}

/// Cert access with a verifying-key cache. The cache is per-handle and
/// populated lazily; an entry keeps the key id and the verifier
/// together.
pub struct CertStore {
    verifiers: HashMap<KeyId, PublicKey>,
}

impl CertStore {
    pub fn new() -> CertStore {
        CertStore { verifiers: HashMap::new() }
    }

    fn verifier(&mut self, pile: &Pile, id: &KeyId) -> Result<Option<&PublicKey>> {
        if !self.verifiers.contains_key(id) {
            match get_key(pile, id) {
                Ok((_, public)) => {
                    self.verifiers.insert(*id, public);
                }
                Err(crate::Error::NotFound(_, _)) => return Ok(None),
                Err(err) => return Err(err),
            }
        }
        Ok(self.verifiers.get(id))
    }

    /// Check one cert's signature against the stored key.
    pub fn check_signature(&mut self, pile: &Pile, cert: &Cert) -> Result<SigCheck> {
        let public = match self.verifier(pile, &cert.key)? {
            Some(public) => public,
            None => return Ok(SigCheck::Unknown),
        };
        let sig = match Signature::try_from(cert.sig.as_slice()) {
            Ok(sig) => sig,
            Err(_) => return Ok(SigCheck::Bad),
        };
        let text = Cert::signable_text(&cert.key, &cert.ident, &cert.name, &cert.value);
        match public.verify(&text, &sig) {
            Ok(_) => Ok(SigCheck::Good),
            Err(_) => Ok(SigCheck::Bad),
        }
    }

    /// Raw insert, no branch bookkeeping. Returns false when the exact
    /// cert is already present.
    pub fn put_cert_row(&mut self, pile: &mut Pile, cert: &Cert) -> Result<bool> {
        let key = cert_key(cert);
        if pile.exists("revision_certs", &key)? {
            return Ok(false);
        }
        pile.set("revision_certs", &key, &util::into_cbor_bytes(cert.to_row())?)?;
        Ok(true)
    }

    pub fn cert_exists(&self, pile: &Pile, cert: &Cert) -> Result<bool> {
        pile.exists("revision_certs", &cert_key(cert))
    }

    /// All certs attached to `rev`.
    pub fn get_certs(&self, pile: &Pile, rev: &RevisionId) -> Result<Vec<Cert>> {
        let prefix = pile::prefix2(&rev.inner().to_bytes());
        let mut certs = vec![];
        for (_, value) in pile.iter_prefix("revision_certs", &prefix)? {
            certs.push(Cert::from_row(util::from_cbor_bytes::<CertRow>(&value)?.0)?);
        }
        Ok(certs)
    }

    /// Certs on `rev` with the given name.
    pub fn get_certs_named(
        &self,
        pile: &Pile,
        rev: &RevisionId,
        name: &str,
    ) -> Result<Vec<Cert>> {
        let certs = self.get_certs(pile, rev)?;
        Ok(certs.into_iter().filter(|c| c.name == name).collect())
    }

    /// Every cert in the store, used by maintenance sweeps.
    pub fn all_certs(&self, pile: &Pile) -> Result<Vec<Cert>> {
        let mut certs = vec![];
        for (_, value) in pile.iter("revision_certs")? {
            certs.push(Cert::from_row(util::from_cbor_bytes::<CertRow>(&value)?.0)?);
        }
        Ok(certs)
    }

    /// Split `certs` into trustworthy groups and noise. Certs are
    /// grouped by `(ident, name, value)`; signatures split into good,
    /// bad and unknown; a group whose good signers satisfy `trust_fn`
    /// contributes one representative, everything else is dropped with
    /// a diagnostic per bad or unknown signer.
    pub fn erase_bogus_certs(
        &mut self,
        pile: &Pile,
        monitor: &mut dyn Monitor,
        trust_fn: &dyn Fn(&[String], &RevisionId, &str, &str) -> bool,
        certs: Vec<Cert>,
    ) -> Result<Vec<Cert>> {
        use std::collections::BTreeMap;

        let mut groups: BTreeMap<(RevisionId, String, String), Vec<Cert>> = BTreeMap::new();
        for cert in certs.into_iter() {
            let key = (cert.ident, cert.name.clone(), cert.value.clone());
            groups.entry(key).or_default().push(cert);
        }

        let mut kept = vec![];
        for ((ident, name, value), group) in groups.into_iter() {
            let mut good: Vec<Cert> = vec![];
            let mut signers: Vec<String> = vec![];
            for cert in group.into_iter() {
                match self.check_signature(pile, &cert)? {
                    SigCheck::Good => {
                        let (key_name, _) = get_key(pile, &cert.key)?;
                        signers.push(key_name);
                        good.push(cert);
                    }
                    SigCheck::Bad => monitor.warn(format!(
                        "ignoring bad signature by '{}' on '{}' cert for {}",
                        cert.key, name, ident
                    )),
                    SigCheck::Unknown => monitor.warn(format!(
                        "ignoring cert signed by unknown key '{}' on '{}' for {}",
                        cert.key, name, ident
                    )),
                }
            }

            if !good.is_empty() && trust_fn(&signers, &ident, &name, &value) {
                kept.push(good.remove(0));
            } else if !good.is_empty() {
                monitor.warn(format!(
                    "trust function disliked {} signers of '{}' cert on {}",
                    signers.len(),
                    name,
                    ident
                ));
            }
        }
        Ok(kept)
    }

    /// Maintenance sweep: re-verify every stored cert and physically
    /// delete the ones whose signature no longer checks out. The only
    /// path that ever deletes a cert.
    pub fn fix_bad_certs(
        &mut self,
        pile: &mut Pile,
        monitor: &mut dyn Monitor,
    ) -> Result<usize> {
        let certs = self.all_certs(pile)?;
        let mut dropped = 0;
        for cert in certs.into_iter() {
            if self.check_signature(pile, &cert)? == SigCheck::Bad {
                pile.del("revision_certs", &cert_key(&cert))?;
                monitor.warn(format!(
                    "dropped cert '{}' on {} with bad signature", cert.name, cert.ident
                ));
                dropped += 1;
            }
        }
        Ok(dropped)
    }
}

impl Default for CertStore {
    fn default() -> Self {
        CertStore::new()
    }
}

fn cert_key(cert: &Cert) -> Vec<u8> {
    pile::key2(&cert.ident.inner().to_bytes(), &cert.id().inner().to_bytes())
}

/// Generate a fresh signing keypair from caller-supplied entropy.
pub fn keypair_from_bytes(seed: &[u8; 32]) -> Result<Keypair> {
    let secret = err_at!(InvalidInput, ed25519_dalek::SecretKey::from_bytes(seed))?;
    let public = PublicKey::from(&secret);
    Ok(Keypair { secret, public })
}

#[cfg(test)]
#[path = "cert_test.rs"]
mod cert_test;
