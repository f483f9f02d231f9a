use std::path::Path;

use approx::assert_relative_eq;
use cmr_compare::case::view::{SAX_CINE, SAX_CINE_TAG};
use cmr_compare::case::FrameMeta;
use cmr_compare::io::annotation_record::{AnnotationRecord, ShapeRecord};
use cmr_compare::io::output::write_report;
use cmr_compare::stats::SliceSelection;
use cmr_compare::{apply_view, AnalysisConfig, Case, CaseComparison, CohortJob};

fn square(x: f64, y: f64, side: f64) -> ShapeRecord {
    ShapeRecord::Polygon(vec![vec![
        [x, y],
        [x + side, y],
        [x + side, y + side],
        [x, y + side],
        [x, y],
    ]])
}

/// Three slices, two phases; `lv_endo` sides per [phase][slice].
fn build_case(dir: &Path, reader: &str, uid: &str, sides: [[f64; 3]; 2]) -> anyhow::Result<Case> {
    let mut case = Case::new("patient01", reader, uid);
    for (phase, per_slice) in sides.iter().enumerate() {
        for (slice, side) in per_slice.iter().enumerate() {
            let sop = format!("{}.{}.{}", uid, slice, phase);
            let meta = FrameMeta {
                image_position: Some([-120.0, -90.0, 40.0 - 10.0 * slice as f64]),
                image_orientation: Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
                instance_number: phase as i32 + 1,
                trigger_time: Some(phase as f64 * 350.0),
                pixel_spacing: Some([1.25, 1.25]),
                slice_thickness: Some(8.0),
                rows: 128,
                columns: 128,
                ..Default::default()
            };
            case.add_image(SAX_CINE_TAG, &sop, dir.join(format!("{}.dcm", sop)), meta);

            let mut record = AnnotationRecord::default();
            record.contours.insert("lv_endo".to_string(), square(40.0, 40.0, *side));
            let path = dir.join(reader).join(format!("{}.json", sop));
            record.write(&path)?;
            case.add_annotation(&sop, path);
        }
    }
    Ok(case)
}

const SIDES: [[f64; 3]; 2] = [[30.0, 32.0, 20.0], [22.0, 24.0, 14.0]];

#[test]
fn identical_readers_agree_on_every_slice() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let case1 = build_case(dir.path(), "reader1", "1.2.840.1", SIDES)?;
    let case2 = build_case(dir.path(), "reader2", "1.2.840.1", SIDES)?;
    let comparison = CaseComparison::from_cases(case1, case2, &SAX_CINE)?;

    let rows: Vec<_> = comparison
        .slice_table(true)?
        .iter()
        .filter(|r| r.contour == "lv_endo" && r.category == "SAX LV ED")
        .cloned()
        .collect();
    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert_relative_eq!(row.metric("Dice").unwrap(), 100.0, epsilon = 1e-6);
        assert_relative_eq!(row.metric("ml diff").unwrap(), 0.0, epsilon = 1e-9);
    }
    // slices are ordered along the slice normal, so the last stored slice comes first
    assert_eq!(rows[0].sop1.as_deref(), Some("1.2.840.1.2.0"));
    let positions: Vec<_> = rows.iter().map(|r| (r.position1.as_str(), r.position2.as_str())).collect();
    assert_eq!(
        positions,
        vec![("basal", "basal"), ("midv", "midv"), ("apical", "apical")]
    );
    Ok(())
}

#[test]
fn persisted_case_reproduces_phases_and_clinical_results() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let case = build_case(dir.path(), "reader1", "1.2.840.2", SIDES)?;
    let path = dir.path().join("cases").join("reader1.json");
    case.save(&path)?;
    let reloaded = Case::load(&path)?;

    let before = apply_view(std::sync::Arc::new(case), &SAX_CINE)?;
    let after = apply_view(std::sync::Arc::new(reloaded), &SAX_CINE)?;
    let phases = |v: &cmr_compare::ViewedCase| v.categories.iter().map(|c| c.phase).collect::<Vec<_>>();
    assert_eq!(phases(&before), phases(&after));

    for ((cr, v1), (_, v2)) in before.clinical_values().into_iter().zip(after.clinical_values()) {
        if v1.is_nan() {
            assert!(v2.is_nan(), "{} differs after reload", cr.name);
        } else {
            assert_relative_eq!(v1, v2, epsilon = 1e-12);
        }
    }
    let edv = before.clinical_values().into_iter().find(|(cr, _)| cr.name == "LVEDV").unwrap().1;
    let px = 1.25 * 1.25 * 8.0 / 1000.0;
    assert_relative_eq!(edv, (900.0 + 1024.0 + 400.0) * px, epsilon = 1e-9);
    Ok(())
}

#[test]
fn cohort_report_is_written() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut comparisons = Vec::new();
    for i in 0..4 {
        let uid = format!("1.2.840.{}", 10 + i);
        let mut other = SIDES;
        other[0][1] += i as f64;
        let case1 = build_case(&dir.path().join(&uid), "reader1", &uid, SIDES)?;
        let case2 = build_case(&dir.path().join(&uid), "reader2", &uid, other)?;
        comparisons.push(CaseComparison::from_cases(case1, case2, &SAX_CINE)?);
    }

    let config = AnalysisConfig::default();
    let report = CohortJob::spawn(comparisons, config.clone())?.wait()?;
    assert_eq!(report.cases.len(), 4);
    assert!(report.failed.is_empty());

    let dice_both = report
        .metrics
        .iter()
        .find(|m| {
            m.contour == "lv_endo" && m.metric == "Dice" && m.position.is_none() && m.selection == SliceSelection::ContouredByBoth
        })
        .unwrap();
    // only the end-diastolic mid slice of the three differing cases
    assert_eq!(dice_both.stats.n, 3);

    let out = dir.path().join("report");
    write_report(&out, &report, &config.csv)?;
    let summary = std::fs::read_to_string(out.join("clinical_summary.csv"))?;
    assert!(summary.starts_with("clinical_result;unit;tol_range;n;"));
    assert!(summary.lines().any(|l| l.starts_with("LVEDV;ml;10;4;")));
    Ok(())
}
