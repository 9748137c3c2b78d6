use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::tempdir;

const SAMPLES: usize = 12;
const FEATURES: usize = 24;

fn table(corner: &str, columns: &[String], rows: &[(String, Vec<String>)]) -> String {
    let mut out = format!("{corner}\t{}\n", columns.join("\t"));
    for (name, cells) in rows {
        writeln!(out, "{name}\t{}", cells.join("\t")).unwrap();
    }
    out
}

/// One continuous view generated exactly by factor 1, with two gaps.
fn write_fixture(dir: &Path) {
    let samples: Vec<String> = (1..=SAMPLES).map(|j| format!("s{j}")).collect();
    let z: Vec<[f64; 2]> = (0..SAMPLES)
        .map(|j| [j as f64 - 5.5, if j % 2 == 0 { 1.0 } else { -1.0 }])
        .collect();
    let w: Vec<[f64; 2]> = (0..FEATURES)
        .map(|d| [if d < 12 { 1.0 + d as f64 * 0.1 } else { -0.2 }, 0.0])
        .collect();

    let factor_rows: Vec<(String, Vec<String>)> = samples
        .iter()
        .zip(&z)
        .map(|(s, zj)| (s.clone(), zj.iter().map(f64::to_string).collect()))
        .collect();
    let factor_columns = vec!["Factor1".to_string(), "Factor2".to_string()];
    fs::write(dir.join("z.tsv"), table("sample", &factor_columns, &factor_rows)).unwrap();

    let weight_rows: Vec<(String, Vec<String>)> = w
        .iter()
        .enumerate()
        .map(|(d, wd)| (format!("g{d}"), wd.iter().map(f64::to_string).collect()))
        .collect();
    fs::write(dir.join("w.tsv"), table("feature", &factor_columns, &weight_rows)).unwrap();

    let data_rows: Vec<(String, Vec<String>)> = w
        .iter()
        .enumerate()
        .map(|(d, wd)| {
            let cells = z
                .iter()
                .enumerate()
                .map(|(j, zj)| {
                    if (d, j) == (0, 0) || (d, j) == (3, 7) {
                        "NA".to_string()
                    } else {
                        (wd[0] * zj[0] + wd[1] * zj[1]).to_string()
                    }
                })
                .collect();
            (format!("g{d}"), cells)
        })
        .collect();
    fs::write(dir.join("rna.tsv"), table("feature", &samples, &data_rows)).unwrap();

    let mut sets = String::from("set\tfeature\n");
    for d in 0..12 {
        writeln!(sets, "loaded\tg{d}").unwrap();
    }
    for d in 12..FEATURES {
        writeln!(sets, "flat\tg{d}").unwrap();
    }
    fs::write(dir.join("sets.tsv"), sets).unwrap();

    let mut covariates = String::from("sample\tbatch\n");
    for (j, s) in samples.iter().enumerate() {
        writeln!(covariates, "{s}\t{}", j % 3).unwrap();
    }
    fs::write(dir.join("covariates.tsv"), covariates).unwrap();

    fs::write(
        dir.join("config.toml"),
        "factors = \"z.tsv\"\n\n[[views]]\nname = \"rna\"\nlikelihood = \"continuous\"\ndata = \"rna.tsv\"\nweights = \"w.tsv\"\n\n[enrichment]\nalpha = 0.05\nmin_set_size = 5\n",
    )
    .unwrap();
}

fn mofa(dir: &Path, args: &[&str]) {
    let status = Command::new(env!("CARGO_BIN_EXE_mofa"))
        .current_dir(dir)
        .args(args)
        .status()
        .expect("run mofa cli");
    assert!(status.success(), "mofa {args:?} exited with {status:?}");
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.split('\t').map(str::to_string).collect())
        .collect()
}

#[test]
fn variance_reports_the_generating_factor() {
    let tmp = tempdir().expect("temporary directory");
    write_fixture(tmp.path());
    mofa(tmp.path(), &["variance", "config.toml", "--output", "r2.tsv"]);

    let rows = read_rows(&tmp.path().join("r2.tsv"));
    assert_eq!(rows[0], vec!["factor", "rna"]);
    assert_eq!(rows[1][0], "Factor1");
    assert!((rows[1][1].parse::<f64>().unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(rows[2][1].parse::<f64>().unwrap(), 0.0);
    assert_eq!(rows[3][0], "total");
}

#[test]
fn variance_writes_per_feature_tables() {
    let tmp = tempdir().expect("temporary directory");
    write_fixture(tmp.path());
    mofa(
        tmp.path(),
        &["variance", "config.toml", "--output", "r2.tsv", "--per-feature", "features"],
    );

    let rows = read_rows(&tmp.path().join("features").join("rna_per_feature.tsv"));
    assert_eq!(rows[0], vec!["feature", "r2"]);
    assert_eq!(rows.len(), FEATURES + 1);
    assert_eq!(rows[1][0], "g0");
    for row in &rows[1..] {
        assert!((row[1].parse::<f64>().unwrap() - 1.0).abs() < 1e-9, "{row:?}");
    }
}

#[test]
fn impute_and_predict_write_tables() {
    let tmp = tempdir().expect("temporary directory");
    write_fixture(tmp.path());
    mofa(tmp.path(), &["impute", "config.toml", "--output-dir", "imputed"]);
    let rows = read_rows(&tmp.path().join("imputed").join("rna_imputed.tsv"));
    assert_eq!(rows.len(), FEATURES + 1);
    // g0 in s1 was missing: 1.0 * -5.5
    assert!((rows[1][1].parse::<f64>().unwrap() + 5.5).abs() < 1e-9);
    assert!(rows.iter().flatten().all(|cell| cell != "NA"));

    mofa(
        tmp.path(),
        &["predict", "config.toml", "--view", "rna", "--factors", "2", "--output", "p.tsv"],
    );
    let rows = read_rows(&tmp.path().join("p.tsv"));
    assert!(rows[1..].iter().all(|r| r[1..].iter().all(|c| c.parse::<f64>().unwrap() == 0.0)));
}

#[test]
fn enrich_finds_the_loaded_set() {
    let tmp = tempdir().expect("temporary directory");
    write_fixture(tmp.path());
    mofa(
        tmp.path(),
        &[
            "enrich",
            "config.toml",
            "--view",
            "rna",
            "--feature-sets",
            "sets.tsv",
            "--factors",
            "1",
            "--output",
            "enrichment.tsv",
        ],
    );
    let rows = read_rows(&tmp.path().join("enrichment.tsv"));
    assert_eq!(rows[0][0], "set");
    let loaded = rows.iter().find(|r| r[0] == "loaded").unwrap();
    assert_eq!(loaded[1], "Factor1");
    assert_eq!(loaded[6], "true");
}

#[test]
fn regress_and_failures() {
    let tmp = tempdir().expect("temporary directory");
    write_fixture(tmp.path());
    mofa(
        tmp.path(),
        &[
            "regress",
            "config.toml",
            "--covariates",
            "covariates.tsv",
            "--min-observations",
            "5",
            "--output-dir",
            "regressed",
        ],
    );
    let rows = read_rows(&tmp.path().join("regressed").join("rna_regressed.tsv"));
    assert_eq!(rows.len(), FEATURES + 1);
    assert_eq!(rows[1][1], "NA");

    let status = Command::new(env!("CARGO_BIN_EXE_mofa"))
        .current_dir(tmp.path())
        .args(["predict", "config.toml", "--view", "protein"])
        .status()
        .expect("run mofa cli");
    assert!(!status.success());

    let mut covariates = fs::read_to_string(tmp.path().join("covariates.tsv")).unwrap();
    covariates.push_str("s1\t2\n");
    fs::write(tmp.path().join("covariates.tsv"), covariates).unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_mofa"))
        .current_dir(tmp.path())
        .args(["regress", "config.toml", "--covariates", "covariates.tsv", "--output-dir", "again"])
        .status()
        .expect("run mofa cli");
    assert!(!status.success());
    assert!(!tmp.path().join("again").exists());
}
