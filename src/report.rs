use std::collections::BTreeMap;
use std::io::{Read, Seek};

use log::debug;
use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::error::{CiPulseError, Result};

/// How a test case finished. Exactly one applies per case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Skipped,
    Failed,
    Errored,
}

/// Per (file, classname) counters. Failed and errored cases both land in
/// `error`, matching how the report grid groups red cells.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassCounters {
    pub passed: usize,
    pub error: usize,
    pub skipped: usize,
    pub cases: usize,
    pub time_secs: f64,
}

/// One failing or erroring case with its raw failure text, kept separate
/// from the counters for detailed display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailingCase {
    pub file: String,
    pub classname: String,
    pub name: String,
    pub status: CaseStatus,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestReportSummary {
    /// Keyed by (report file, classname).
    #[serde(with = "class_map")]
    pub classes: BTreeMap<(String, String), ClassCounters>,
    pub failures: Vec<FailingCase>,
    pub total_files: usize,
    pub total_classes: usize,
    pub total_cases: usize,
}

/// JSON maps need string keys, so the (file, classname) pair flattens to
/// `file::classname` on the wire.
mod class_map {
    use std::collections::BTreeMap;

    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::ClassCounters;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<(String, String), ClassCounters>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for ((file, class), counters) in map {
            out.serialize_entry(&format!("{file}::{class}"), counters)?;
        }
        out.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<(String, String), ClassCounters>, D::Error> {
        let flat: BTreeMap<String, ClassCounters> = BTreeMap::deserialize(deserializer)?;
        Ok(flat
            .into_iter()
            .map(|(key, counters)| {
                let (file, class) = key.split_once("::").unwrap_or((key.as_str(), ""));
                ((file.to_string(), class.to_string()), counters)
            })
            .collect())
    }
}

/// Decompresses a test-report archive and aggregates every suite file.
///
/// Each archive entry is an XML document holding either a single
/// `<testsuite>` or a `<testsuites>` wrapper around several; both shapes
/// are normalized to a list before processing.
pub fn aggregate_archive<R: Read + Seek>(reader: R) -> Result<TestReportSummary> {
    let mut archive = ZipArchive::new(reader)?;
    let mut summary = TestReportSummary::default();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let file_name = entry.name().to_string();

        let mut contents = String::new();
        entry.read_to_string(&mut contents).map_err(|e| {
            CiPulseError::Malformed(format!("{file_name}: not valid UTF-8: {e}"))
        })?;

        debug!("Aggregating report file: {file_name}");
        aggregate_file(&file_name, &contents, &mut summary)?;
        summary.total_files += 1;
    }

    summary.total_classes = summary.classes.len();
    Ok(summary)
}

fn aggregate_file(file_name: &str, xml: &str, summary: &mut TestReportSummary) -> Result<()> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| CiPulseError::Xml(format!("{file_name}: {e}")))?;

    let root = doc.root_element();
    let suites: Vec<roxmltree::Node> = match root.tag_name().name() {
        "testsuite" => vec![root],
        "testsuites" => root
            .children()
            .filter(|n| n.has_tag_name("testsuite"))
            .collect(),
        other => {
            return Err(CiPulseError::Xml(format!(
                "{file_name}: unexpected root element <{other}>"
            )))
        }
    };

    for suite in suites {
        for case in suite.children().filter(|n| n.has_tag_name("testcase")) {
            aggregate_case(file_name, &case, summary);
        }
    }
    Ok(())
}

fn aggregate_case(file_name: &str, case: &roxmltree::Node, summary: &mut TestReportSummary) {
    let classname = case.attribute("classname").unwrap_or("").to_string();
    let name = case.attribute("name").unwrap_or("").to_string();
    let time: f64 = case
        .attribute("time")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0.0);

    let (status, text) = case_status(case);

    let counters = summary
        .classes
        .entry((file_name.to_string(), classname.clone()))
        .or_default();
    counters.cases += 1;
    counters.time_secs += time;
    summary.total_cases += 1;

    match status {
        CaseStatus::Passed => counters.passed += 1,
        CaseStatus::Skipped => counters.skipped += 1,
        CaseStatus::Failed | CaseStatus::Errored => {
            counters.error += 1;
            summary.failures.push(FailingCase {
                file: file_name.to_string(),
                classname,
                name,
                status,
                text,
            });
        }
    }
}

fn case_status(case: &roxmltree::Node) -> (CaseStatus, String) {
    for child in case.children().filter(roxmltree::Node::is_element) {
        let text = || {
            let mut out = String::new();
            if let Some(message) = child.attribute("message") {
                out.push_str(message);
            }
            if let Some(body) = child.text() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(body.trim());
            }
            out
        };
        match child.tag_name().name() {
            "failure" => return (CaseStatus::Failed, text()),
            "error" => return (CaseStatus::Errored, text()),
            "skipped" => return (CaseStatus::Skipped, String::new()),
            _ => {}
        }
    }
    (CaseStatus::Passed, String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn archive(entries: &[(&str, &str)]) -> Cursor<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap()
    }

    const MIXED_SUITE: &str = r#"<?xml version="1.0"?>
<testsuite name="test_ops" tests="5">
  <testcase classname="test_ops.TestAdd" name="test_scalar" time="0.01"/>
  <testcase classname="test_ops.TestAdd" name="test_vector" time="0.02"/>
  <testcase classname="test_ops.TestAdd" name="test_matrix" time="0.03"/>
  <testcase classname="test_ops.TestAdd" name="test_broadcast" time="1.5">
    <failure message="shapes do not match">assert (2,3) == (3,2)</failure>
  </testcase>
  <testcase classname="test_ops.TestAdd" name="test_gpu" time="0.0">
    <skipped/>
  </testcase>
</testsuite>"#;

    #[test]
    fn aggregates_a_mixed_suite() {
        let summary = aggregate_archive(archive(&[("test_ops.xml", MIXED_SUITE)])).unwrap();

        assert_eq!(summary.total_files, 1);
        assert_eq!(summary.total_classes, 1);
        assert_eq!(summary.total_cases, 5);

        let counters = summary
            .classes
            .get(&("test_ops.xml".to_string(), "test_ops.TestAdd".to_string()))
            .expect("class counters present");
        assert_eq!(counters.passed, 3);
        assert_eq!(counters.error, 1);
        assert_eq!(counters.skipped, 1);
        assert_eq!(counters.cases, 5);

        assert_eq!(summary.failures.len(), 1);
        let failure = &summary.failures[0];
        assert_eq!(failure.name, "test_broadcast");
        assert_eq!(failure.status, CaseStatus::Failed);
        assert!(failure.text.contains("shapes do not match"));
    }

    #[test]
    fn accepts_testsuites_wrapper() {
        let wrapped = r#"<testsuites>
  <testsuite name="a">
    <testcase classname="A" name="one" time="0.1"/>
  </testsuite>
  <testsuite name="b">
    <testcase classname="B" name="two" time="0.2">
      <error message="boom"/>
    </testcase>
  </testsuite>
</testsuites>"#;

        let summary = aggregate_archive(archive(&[("wrapped.xml", wrapped)])).unwrap();
        assert_eq!(summary.total_cases, 2);
        assert_eq!(summary.total_classes, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].status, CaseStatus::Errored);
    }

    #[test]
    fn accumulates_time_per_class() {
        let summary = aggregate_archive(archive(&[("test_ops.xml", MIXED_SUITE)])).unwrap();
        let counters = &summary.classes[&("test_ops.xml".to_string(), "test_ops.TestAdd".to_string())];
        assert!((counters.time_secs - 1.56).abs() < 1e-9);
    }

    #[test]
    fn counts_classes_across_files() {
        let other = r#"<testsuite><testcase classname="other.TestMul" name="t"/></testsuite>"#;
        let summary =
            aggregate_archive(archive(&[("a.xml", MIXED_SUITE), ("b.xml", other)])).unwrap();

        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.total_classes, 2);
        assert_eq!(summary.total_cases, 6);
    }

    #[test]
    fn malformed_xml_is_reported_not_panicked() {
        let result = aggregate_archive(archive(&[("bad.xml", "<testsuite><unclosed")]));
        assert!(matches!(result, Err(CiPulseError::Xml(_))));
    }

    #[test]
    fn unexpected_root_element_is_malformed() {
        let result = aggregate_archive(archive(&[("bad.xml", "<report/>")]));
        assert!(matches!(result, Err(CiPulseError::Xml(_))));
    }

    #[test]
    fn empty_archive_yields_empty_summary() {
        let summary = aggregate_archive(archive(&[])).unwrap();
        assert_eq!(summary.total_files, 0);
        assert_eq!(summary.total_cases, 0);
        assert!(summary.failures.is_empty());
    }
}
