use std::cell::RefCell;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{AccessionId, Host, Namespace, Outcome, ResolutionResult};
use crate::error::KiraError;
use crate::http::{HttpRequest, Upstream};
use crate::known::KnownMappings;
use crate::providers::{LookupStep, SourceStrategy, StepResult, parse_json, run_chain};

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const GDS_SEARCH_RETMAX: u32 = 5;

static BIOPROJECT_EXTERNAL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<EXTERNAL_ID\b[^>]*\bnamespace="[^"]*BioProject[^"]*"[^>]*>\s*([^<\s]+)\s*</EXTERNAL_ID>"#)
        .expect("valid BioProject regex")
});
static PRJNA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PRJNA\d+$").expect("valid PRJNA regex"));
static SRP_STUDY_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<STUDY_REF\b[^>]*\baccession="(SRP\d+)""#).expect("valid STUDY_REF regex")
});
static GSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"GSE\d+").expect("valid GSE regex"));

/// Summary fields of one GEO DataSets record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GdsSummary {
    pub accession: String,
    pub title: String,
    pub summary: String,
}

/// SRP and SRX resolution through NCBI E-utilities.
pub struct NcbiStrategy {
    upstream: Upstream,
    known: Arc<KnownMappings>,
}

struct SraRecord {
    uid: String,
    xml: String,
}

struct GseSearch<'a> {
    srp: &'a str,
    candidates: Vec<String>,
    texts: RefCell<Vec<String>>,
}

impl NcbiStrategy {
    pub fn new(upstream: Upstream, known: Arc<KnownMappings>) -> Self {
        Self { upstream, known }
    }

    /// Resolves one SRP study. The error is the last soft failure seen.
    pub fn resolve_study(&self, srp: &str) -> (ResolutionResult, Option<KiraError>) {
        let mut failure = None;

        let (sra_uid, bioproject) = match self.sra_record(srp) {
            Ok(Some(record)) => {
                let bioproject = parse_bioproject(&record.xml);
                (Some(record.uid), bioproject)
            }
            Ok(None) => (None, None),
            Err(err) => {
                warn!(accession = srp, error = %err, "BioProject lookup failed");
                failure = Some(err);
                (None, None)
            }
        };

        let candidates = self
            .gds_candidates(srp, bioproject.as_deref())
            .and_then(|ids| match &sra_uid {
                Some(uid) if ids.is_empty() => self.elink_gds(srp, uid),
                _ => Ok(ids),
            });
        let geo = match candidates {
            Ok(candidates) if candidates.is_empty() => {
                debug!(accession = srp, "no GEO DataSets candidates");
                None
            }
            Ok(candidates) => {
                let search = GseSearch {
                    srp,
                    candidates,
                    texts: RefCell::new(Vec::new()),
                };
                let summary_step = ("gds.esummary", |s: &GseSearch<'_>| -> StepResult {
                    self.gse_from_summaries(s)
                });
                let fetch_step = ("gds.efetch", |s: &GseSearch<'_>| -> StepResult {
                    self.gse_from_full_records(s)
                });
                let steps: [&dyn LookupStep<GseSearch<'_>>; 2] = [&summary_step, &fetch_step];
                let chain = run_chain(srp, &steps, &search);
                if chain.value.is_none() {
                    failure = chain.failure.or(failure);
                }
                chain.value
            }
            Err(err) => {
                warn!(accession = srp, error = %err, "GEO DataSets search failed");
                failure = Some(err);
                None
            }
        };

        (
            ResolutionResult {
                bioproject_id: bioproject,
                geo_id: geo,
            },
            failure,
        )
    }

    fn resolve_sample(&self, srx: &AccessionId) -> Outcome {
        let record = match self.sra_record(srx.as_str()) {
            Ok(Some(record)) => record.xml,
            Ok(None) => return Outcome::NotFound,
            Err(err) => return Outcome::Failed(err),
        };
        let Some(srp) = parse_srp_study_ref(&record) else {
            debug!(accession = %srx, "no SRP study reference in SRA record");
            return Outcome::NotFound;
        };
        debug!(accession = %srx, study = %srp, "sample belongs to study");

        let sample_bioproject = parse_bioproject(&record);
        let (mut result, failure) = match srp
            .parse::<AccessionId>()
            .ok()
            .and_then(|study| self.known.get(&study).cloned())
        {
            Some(known) => (known, None),
            None => self.resolve_study(&srp),
        };
        if result.bioproject_id.is_none() {
            result.bioproject_id = sample_bioproject;
        }
        Outcome::from_parts(result, failure)
    }

    /// esearch + efetch on the SRA database; `None` when the accession is unknown.
    fn sra_record(&self, accession: &str) -> Result<Option<SraRecord>, KiraError> {
        let ids = self.esearch("sra", accession, 1)?;
        let Some(uid) = ids.into_iter().next() else {
            return Ok(None);
        };
        let xml = self.fetch(
            HttpRequest::get(format!("{EUTILS_BASE}/efetch.fcgi"))
                .param("db", "sra")
                .param("id", uid.clone())
                .param("retmode", "xml"),
        )?;
        Ok(xml.map(|xml| SraRecord { uid, xml }))
    }

    /// GEO DataSets uids linked from an SRA uid.
    fn elink_gds(&self, srp: &str, sra_uid: &str) -> Result<Vec<String>, KiraError> {
        debug!(accession = srp, uid = sra_uid, "following SRA links to GEO DataSets");
        let body = self.fetch(
            HttpRequest::get(format!("{EUTILS_BASE}/elink.fcgi"))
                .param("dbfrom", "sra")
                .param("db", "gds")
                .param("id", sra_uid.to_string())
                .param("retmode", "json"),
        )?;
        match body {
            Some(body) => parse_elink_ids(&body, "gds"),
            None => Ok(Vec::new()),
        }
    }

    fn gds_candidates(&self, srp: &str, bioproject: Option<&str>) -> Result<Vec<String>, KiraError> {
        if let Some(bioproject) = bioproject {
            let ids = self.esearch(
                "gds",
                &format!("{bioproject}[BioProject] OR {srp}"),
                GDS_SEARCH_RETMAX,
            )?;
            if !ids.is_empty() {
                return Ok(ids);
            }
        }
        self.esearch("gds", srp, GDS_SEARCH_RETMAX)
    }

    fn gse_from_summaries(&self, search: &GseSearch<'_>) -> StepResult {
        let mut failure = None;
        for uid in &search.candidates {
            let body = match self.fetch(
                HttpRequest::get(format!("{EUTILS_BASE}/esummary.fcgi"))
                    .param("db", "gds")
                    .param("id", uid.clone())
                    .param("retmode", "json"),
            ) {
                Ok(Some(body)) => body,
                Ok(None) => continue,
                Err(err) => {
                    failure = Some(err);
                    continue;
                }
            };
            let summary = match parse_gds_summary(&body, uid) {
                Ok(Some(summary)) => summary,
                Ok(None) => continue,
                Err(err) => {
                    failure = Some(err);
                    continue;
                }
            };
            if summary.accession.starts_with("GSE") {
                return Ok(Some(summary.accession));
            }
            let mut texts = search.texts.borrow_mut();
            texts.push(summary.title);
            texts.push(summary.summary);
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    fn gse_from_full_records(&self, search: &GseSearch<'_>) -> StepResult {
        let raw = self.fetch(
            HttpRequest::post(format!("{EUTILS_BASE}/efetch.fcgi"))
                .param("db", "gds")
                .param("id", search.candidates.join(","))
                .param("retmode", "xml"),
        );
        if let Ok(Some(text)) = &raw
            && let Some(found) = scan_gse(text)
        {
            return Ok(Some(found));
        }
        let texts = search.texts.borrow();
        if let Some(found) = texts.iter().find_map(|text| scan_gse(text)) {
            debug!(accession = search.srp, gse = %found, "GSE found in summary text");
            return Ok(Some(found));
        }
        raw.map(|_| None)
    }

    fn esearch(&self, db: &str, term: &str, retmax: u32) -> Result<Vec<String>, KiraError> {
        let body = self.fetch(
            HttpRequest::get(format!("{EUTILS_BASE}/esearch.fcgi"))
                .param("db", db)
                .param("term", term)
                .param("retmode", "json")
                .param("retmax", retmax.to_string()),
        )?;
        match body {
            Some(body) => parse_esearch_ids(&body),
            None => Ok(Vec::new()),
        }
    }

    fn fetch(&self, request: HttpRequest) -> Result<Option<String>, KiraError> {
        self.upstream.fetch(Host::Ncbi, request)
    }
}

impl SourceStrategy for NcbiStrategy {
    fn resolve(&self, id: &AccessionId) -> Outcome {
        if let Some(known) = self.known.get(id) {
            return Outcome::Resolved(known.clone());
        }
        match id.namespace() {
            Namespace::Srp => {
                let (result, failure) = self.resolve_study(id.as_str());
                Outcome::from_parts(result, failure)
            }
            Namespace::Srx => self.resolve_sample(id),
            _ => Outcome::Failed(KiraError::UnsupportedNamespace(id.to_string())),
        }
    }
}

/// `esearchresult.idlist` of an esearch JSON reply.
pub fn parse_esearch_ids(body: &str) -> Result<Vec<String>, KiraError> {
    let payload = parse_json("esearch", body)?;
    if let Some(error) = payload.get("error").and_then(Value::as_str) {
        return Err(KiraError::malformed("esearch", error.to_string()));
    }
    let result = payload
        .get("esearchresult")
        .ok_or_else(|| KiraError::malformed("esearch", "missing esearchresult"))?;
    if let Some(error) = result.get("ERROR").and_then(Value::as_str) {
        return Err(KiraError::malformed("esearch", error.to_string()));
    }
    Ok(result["idlist"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|value| match value {
                    Value::String(id) => Some(id.clone()),
                    Value::Number(id) => Some(id.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default())
}

/// Linked uids of every `linksets[].linksetdbs[]` entry pointing at `dbto`.
pub fn parse_elink_ids(body: &str, dbto: &str) -> Result<Vec<String>, KiraError> {
    let payload = parse_json("elink", body)?;
    if let Some(error) = payload.get("ERROR").and_then(Value::as_str) {
        return Err(KiraError::malformed("elink", error.to_string()));
    }
    let mut ids: Vec<String> = Vec::new();
    let linksets = payload["linksets"].as_array().map(Vec::as_slice).unwrap_or_default();
    for linkset in linksets {
        let dbs = linkset["linksetdbs"].as_array().map(Vec::as_slice).unwrap_or_default();
        for db in dbs.iter().filter(|db| db["dbto"].as_str() == Some(dbto)) {
            let links = db["links"].as_array().map(Vec::as_slice).unwrap_or_default();
            for link in links {
                let id = match link {
                    Value::String(id) => id.clone(),
                    Value::Number(id) => id.to_string(),
                    _ => continue,
                };
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids.truncate(GDS_SEARCH_RETMAX as usize);
    Ok(ids)
}

/// `result.<uid>` of a GEO DataSets esummary JSON reply.
pub fn parse_gds_summary(body: &str, uid: &str) -> Result<Option<GdsSummary>, KiraError> {
    let payload = parse_json("esummary", body)?;
    let result = payload
        .get("result")
        .ok_or_else(|| KiraError::malformed("esummary", "missing result"))?;
    let Some(record) = result.get(uid).filter(|record| record.is_object()) else {
        return Ok(None);
    };
    let field = |name: &str| record[name].as_str().unwrap_or_default().trim().to_string();
    Ok(Some(GdsSummary {
        accession: field("accession"),
        title: field("title"),
        summary: field("summary"),
    }))
}

/// First `PRJNA` id in a BioProject-namespaced `EXTERNAL_ID` of an SRA record.
pub fn parse_bioproject(xml: &str) -> Option<String> {
    BIOPROJECT_EXTERNAL_ID
        .captures_iter(xml)
        .filter_map(|cap| cap.get(1))
        .map(|value| value.as_str())
        .find(|value| PRJNA.is_match(value))
        .map(str::to_string)
}

pub fn parse_srp_study_ref(xml: &str) -> Option<String> {
    SRP_STUDY_REF
        .captures(xml)
        .and_then(|cap| cap.get(1))
        .map(|value| value.as_str().to_string())
}

pub fn scan_gse(text: &str) -> Option<String> {
    GSE.find(text).map(|value| value.as_str().to_string())
}
