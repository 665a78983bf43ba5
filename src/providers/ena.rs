use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::domain::{AccessionId, Host, Namespace, Outcome, ResolutionResult};
use crate::error::KiraError;
use crate::http::{HttpRequest, Upstream};
use crate::known::KnownMappings;
use crate::providers::{
    LookupStep, SourceStrategy, StepResult, first_field_with_prefix, parse_json, run_chain,
};

const EBI_BASE: &str = "https://www.ebi.ac.uk";

static PROJECT_ACCESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<PROJECT\b[^>]*\baccession="([^"]+)""#).expect("valid PROJECT regex")
});
static STUDY_ACCESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<STUDY\b[^>]*\baccession="([^"]+)""#).expect("valid STUDY regex")
});
static BIOPROJECT_EXTERNAL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<EXTERNAL_ID\b[^>]*\bnamespace="[^"]*BioProject[^"]*"[^>]*>\s*([^<\s]+)\s*</EXTERNAL_ID>"#)
        .expect("valid BioProject regex")
});
static XREF_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<XREF_LINK\b[^>]*>(.*?)</XREF_LINK>").expect("valid XREF_LINK regex")
});
static XREF_DB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<DB\b[^>]*>\s*([^<]*?)\s*</DB>").expect("valid DB regex"));
static XREF_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<ID\b[^>]*>\s*([^<]*?)\s*</ID>").expect("valid ID regex"));
static STUDY_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<STUDY_REF\b[^>]*\baccession="((?:ERP|PRJEB)\d+)""#)
        .expect("valid STUDY_REF regex")
});
static PRJEB_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PRJEB(\d+)").expect("valid PRJEB regex"));
static ERP_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"ERP\d+").expect("valid ERP regex"));
static E_MTAB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"E-MTAB-\d+").expect("valid E-MTAB regex"));

/// Study and BioProject ids an ArrayExpress lookup is keyed by.
struct ArrayExpressKeys<'a> {
    erp: &'a str,
    bioproject: Option<&'a str>,
}

/// ERP and ERX resolution through ENA, BioStudies and EBI Search.
pub struct EnaStrategy {
    upstream: Upstream,
    known: Arc<KnownMappings>,
}

impl EnaStrategy {
    pub fn new(upstream: Upstream, known: Arc<KnownMappings>) -> Self {
        Self { upstream, known }
    }

    /// Resolves one ERP study. The error is the last soft failure seen.
    pub fn resolve_study(&self, erp: &str) -> (ResolutionResult, Option<KiraError>) {
        let filereport = ("ena.filereport", |erp: &str| -> StepResult {
            self.bioproject_from_filereport(erp)
        });
        let browser = ("ena.browser.xml", |erp: &str| -> StepResult {
            self.bioproject_from_browser(erp)
        });
        let study = ("ena.portal.study", |erp: &str| -> StepResult {
            self.bioproject_from_study(erp)
        });
        let steps: [&dyn LookupStep<str>; 3] = [&filereport, &browser, &study];
        let chain = run_chain(erp, &steps, erp);

        let mut failure = chain.failure;
        let bioproject = match chain.value {
            Some(value) => Some(value),
            None if chain.answered > 0 => derived_bioproject(erp),
            None => None,
        };

        let keys = ArrayExpressKeys {
            erp,
            bioproject: bioproject.as_deref(),
        };
        let geo = self.arrayexpress_chain(&keys);
        let geo = match geo {
            Ok(value) => value,
            Err(err) => {
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

    fn arrayexpress_chain(&self, keys: &ArrayExpressKeys<'_>) -> StepResult {
        let by_study = ("biostudies.search", |k: &ArrayExpressKeys<'_>| -> StepResult {
            self.biostudies_search(k.erp)
        });
        let by_project = ("biostudies.search.bioproject", |k: &ArrayExpressKeys<'_>| -> StepResult {
            match k.bioproject {
                Some(bioproject) => self.biostudies_search(bioproject),
                None => Ok(None),
            }
        });
        let xref_study = ("ena.browser.xref", |k: &ArrayExpressKeys<'_>| -> StepResult {
            self.browser_xref(k.erp)
        });
        let xref_project = ("ena.browser.xref.bioproject", |k: &ArrayExpressKeys<'_>| -> StepResult {
            match k.bioproject {
                Some(bioproject) => self.browser_xref(bioproject),
                None => Ok(None),
            }
        });
        let links = ("ena.portal.links", |k: &ArrayExpressKeys<'_>| -> StepResult {
            match k.bioproject {
                Some(bioproject) => self.portal_links(bioproject),
                None => Ok(None),
            }
        });
        let ebisearch = ("ebisearch", |k: &ArrayExpressKeys<'_>| -> StepResult {
            self.ebi_search(k.erp)
        });
        let legacy = ("arrayexpress.v3", |k: &ArrayExpressKeys<'_>| -> StepResult {
            self.legacy_arrayexpress(k.erp)
        });
        let listing = ("biostudies.arrayexpress", |k: &ArrayExpressKeys<'_>| -> StepResult {
            self.arrayexpress_listing(k.erp)
        });
        let steps: [&dyn LookupStep<ArrayExpressKeys<'_>>; 8] = [
            &by_study,
            &by_project,
            &xref_study,
            &xref_project,
            &links,
            &ebisearch,
            &legacy,
            &listing,
        ];

        let chain = run_chain(keys.erp, &steps, keys);
        match (chain.value, chain.failure) {
            (Some(value), _) => Ok(Some(value)),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(None),
        }
    }

    fn resolve_sample(&self, erx: &AccessionId) -> Outcome {
        let erp = match self.study_of_sample(erx.as_str()) {
            Ok(Some(erp)) => erp,
            Ok(None) => {
                debug!(accession = %erx, "no ERP study for sample");
                return Outcome::NotFound;
            }
            Err(err) => return Outcome::Failed(err),
        };
        debug!(accession = %erx, study = %erp, "sample belongs to study");

        if let Some(known) = erp
            .parse::<AccessionId>()
            .ok()
            .and_then(|study| self.known.get(&study).cloned())
        {
            return Outcome::Resolved(known);
        }
        let (result, failure) = self.resolve_study(&erp);
        Outcome::from_parts(result, failure)
    }

    fn study_of_sample(&self, erx: &str) -> StepResult {
        let browser = ("ena.browser.study_ref", |erx: &str| -> StepResult {
            Ok(self
                .fetch(HttpRequest::get(format!("{EBI_BASE}/ena/browser/api/xml/{erx}")))?
                .and_then(|xml| parse_study_ref(&xml)))
        });
        let filereport = ("ena.filereport.experiment", |erx: &str| -> StepResult {
            Ok(self
                .fetch(
                    HttpRequest::get(format!("{EBI_BASE}/ena/portal/api/filereport"))
                        .param("accession", erx)
                        .param("result", "read_experiment")
                        .param("fields", "study_accession")
                        .param("format", "tsv"),
                )?
                .and_then(|tsv| parse_experiment_report(&tsv)))
        });
        let steps: [&dyn LookupStep<str>; 2] = [&browser, &filereport];
        let chain = run_chain(erx, &steps, erx);
        match (chain.value, chain.failure) {
            (Some(value), _) => Ok(Some(value)),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(None),
        }
    }

    fn bioproject_from_filereport(&self, erp: &str) -> StepResult {
        let body = self.fetch(
            HttpRequest::get(format!("{EBI_BASE}/ena/portal/api/filereport"))
                .param("accession", erp)
                .param("result", "read_run")
                .param("fields", "study_accession")
                .param("format", "json"),
        )?;
        match body {
            Some(body) => parse_study_accession_report("ena filereport", &body),
            None => Ok(None),
        }
    }

    fn bioproject_from_browser(&self, erp: &str) -> StepResult {
        Ok(self
            .fetch(HttpRequest::get(format!("{EBI_BASE}/ena/browser/api/xml/{erp}")))?
            .and_then(|xml| parse_browser_bioproject(&xml)))
    }

    fn bioproject_from_study(&self, erp: &str) -> StepResult {
        let body = self.fetch(
            HttpRequest::get(format!("{EBI_BASE}/ena/portal/api/study"))
                .param("accession", erp)
                .param("format", "json"),
        )?;
        match body {
            Some(body) => parse_study_accession_report("ena study", &body),
            None => Ok(None),
        }
    }

    fn biostudies_search(&self, query: &str) -> StepResult {
        let body = self.fetch(
            HttpRequest::get(format!("{EBI_BASE}/biostudies/api/v1/search")).param("query", query),
        )?;
        let Some(body) = body else {
            return Ok(None);
        };
        let payload = parse_json("biostudies search", &body)?;
        Ok(payload["hits"]
            .as_array()
            .and_then(|hits| first_field_with_prefix(hits, "accession", "E-")))
    }

    fn browser_xref(&self, accession: &str) -> StepResult {
        Ok(self
            .fetch(
                HttpRequest::get(format!("{EBI_BASE}/ena/browser/api/xml/{accession}"))
                    .param("includeLinks", "true"),
            )?
            .and_then(|xml| parse_arrayexpress_xref(&xml)))
    }

    fn portal_links(&self, bioproject: &str) -> StepResult {
        let body = self.fetch(
            HttpRequest::get(format!("{EBI_BASE}/ena/portal/api/links/study"))
                .param("accession", bioproject)
                .param("format", "json"),
        )?;
        let Some(body) = body else {
            return Ok(None);
        };
        let payload = parse_json("ena links", &body)?;
        Ok(payload
            .as_array()
            .and_then(|links| first_field_with_prefix(links, "target_id", "E-")))
    }

    fn ebi_search(&self, erp: &str) -> StepResult {
        let body = self.fetch(
            HttpRequest::get(format!(
                "{EBI_BASE}/ebisearch/ws/rest/arrayexpress-experiments"
            ))
            .param("query", erp)
            .param("format", "json"),
        )?;
        let Some(body) = body else {
            return Ok(None);
        };
        let payload = parse_json("ebi search", &body)?;
        Ok(payload["entries"]
            .as_array()
            .and_then(|entries| first_field_with_prefix(entries, "id", "E-")))
    }

    fn legacy_arrayexpress(&self, erp: &str) -> StepResult {
        let body = self.fetch(
            HttpRequest::get(format!("{EBI_BASE}/arrayexpress/json/v3/experiments"))
                .param("keywords", erp),
        )?;
        match body {
            Some(body) => parse_legacy_experiments(&body),
            None => Ok(None),
        }
    }

    fn arrayexpress_listing(&self, erp: &str) -> StepResult {
        Ok(self
            .fetch(
                HttpRequest::get(format!("{EBI_BASE}/biostudies/arrayexpress/studies"))
                    .param("query", erp),
            )?
            .and_then(|page| E_MTAB.find(&page).map(|value| value.as_str().to_string())))
    }

    /// A blank 2xx body is treated like a missing record.
    fn fetch(&self, request: HttpRequest) -> Result<Option<String>, KiraError> {
        Ok(self
            .upstream
            .fetch(Host::Ebi, request)?
            .filter(|body| !body.trim().is_empty()))
    }
}

impl SourceStrategy for EnaStrategy {
    fn resolve(&self, id: &AccessionId) -> Outcome {
        if let Some(known) = self.known.get(id) {
            return Outcome::Resolved(known.clone());
        }
        match id.namespace() {
            Namespace::Erp => {
                let (result, failure) = self.resolve_study(id.as_str());
                Outcome::from_parts(result, failure)
            }
            Namespace::Erx => self.resolve_sample(id),
            _ => Outcome::Failed(KiraError::UnsupportedNamespace(id.to_string())),
        }
    }
}

/// `PRJEB<N>` for `ERP<N>`. Not authoritative; used only as a last resort.
fn derived_bioproject(erp: &str) -> Option<String> {
    let digits = erp.strip_prefix("ERP")?;
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let derived = format!("PRJEB{digits}");
    debug!(accession = erp, bioproject = %derived, "derived BioProject from study number");
    Some(derived)
}

/// `[0].study_accession` of a portal JSON report, when it is a `PRJEB` id.
pub fn parse_study_accession_report(
    source_name: &'static str,
    body: &str,
) -> Result<Option<String>, KiraError> {
    let payload = parse_json(source_name, body)?;
    Ok(payload
        .as_array()
        .and_then(|rows| rows.first())
        .and_then(|row| row["study_accession"].as_str())
        .map(str::trim)
        .filter(|value| value.starts_with("PRJEB"))
        .map(str::to_string))
}

/// PROJECT, then STUDY accession, then BioProject external id; `PRJEB` only.
pub fn parse_browser_bioproject(xml: &str) -> Option<String> {
    first_prjeb(&PROJECT_ACCESSION, xml)
        .or_else(|| first_prjeb(&STUDY_ACCESSION, xml))
        .or_else(|| first_prjeb(&BIOPROJECT_EXTERNAL_ID, xml))
}

fn first_prjeb(re: &Regex, xml: &str) -> Option<String> {
    re.captures_iter(xml)
        .filter_map(|cap| cap.get(1))
        .map(|value| value.as_str())
        .find(|value| value.starts_with("PRJEB"))
        .map(str::to_string)
}

/// `ID` of the first `XREF_LINK` whose `DB` is ArrayExpress, children in any order.
pub fn parse_arrayexpress_xref(xml: &str) -> Option<String> {
    XREF_LINK
        .captures_iter(xml)
        .filter_map(|cap| cap.get(1))
        .map(|block| block.as_str())
        .filter(|block| xref_child(&XREF_DB, block) == Some("ArrayExpress"))
        .filter_map(|block| xref_child(&XREF_ID, block))
        .find(|id| id.starts_with("E-"))
        .map(str::to_string)
}

fn xref_child<'a>(re: &Regex, block: &'a str) -> Option<&'a str> {
    re.captures(block).and_then(|cap| cap.get(1)).map(|value| value.as_str())
}

/// ERP id from an experiment's `STUDY_REF`; a `PRJEB<N>` reference maps to `ERP<N>`.
pub fn parse_study_ref(xml: &str) -> Option<String> {
    let found = STUDY_REF.captures(xml)?.get(1)?.as_str();
    match found.strip_prefix("PRJEB") {
        Some(digits) => Some(format!("ERP{digits}")),
        None => Some(found.to_string()),
    }
}

/// Study on the second line of a `study_accession` TSV report; `PRJEB<N>` maps to `ERP<N>`.
pub fn parse_experiment_report(tsv: &str) -> Option<String> {
    let line = tsv.trim().lines().nth(1)?;
    if let Some(cap) = PRJEB_NUMBER.captures(line) {
        return Some(format!("ERP{}", &cap[1]));
    }
    ERP_ID.find(line).map(|value| value.as_str().to_string())
}

/// `experiments.experiment[]` of the legacy ArrayExpress JSON API.
pub fn parse_legacy_experiments(body: &str) -> Result<Option<String>, KiraError> {
    let payload = parse_json("arrayexpress", body)?;
    let experiments = match &payload["experiments"]["experiment"] {
        Value::Array(list) => list.clone(),
        Value::Object(_) => vec![payload["experiments"]["experiment"].clone()],
        _ => Vec::new(),
    };
    for experiment in &experiments {
        if let Some(accession) = experiment["accession"].as_str() {
            if accession.starts_with("E-MTAB-") {
                return Ok(Some(accession.to_string()));
            }
        }
        let secondary: Vec<String> = match &experiment["secondaryaccession"] {
            Value::String(joined) => joined.split_whitespace().map(str::to_string).collect(),
            Value::Array(list) => list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if let Some(found) = secondary.into_iter().find(|acc| acc.starts_with("E-MTAB-")) {
            return Ok(Some(found));
        }
    }
    Ok(None)
}
