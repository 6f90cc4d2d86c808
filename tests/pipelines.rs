use std::fs;
use std::path::Path;
use ndarray::{Array1, Array2};
use ndarray_npy::write_npy;
use reltab_learn::{bridge, ogc, BridgeParams, OgcParams, PlanetoidName};


fn split(n: usize) -> (Array1<bool>, Array1<bool>, Array1<bool>) {
    (
        Array1::from_shape_fn(n, |i| i % 4 == 0 || i % 4 == 1),
        Array1::from_shape_fn(n, |i| i % 4 == 2),
        Array1::from_shape_fn(n, |i| i % 4 == 3),
    )
}

fn write_masks(dir: &Path, n: usize) {
    let (train, val, test) = split(n);
    write_npy(dir.join("train_mask.npy"), &train).unwrap();
    write_npy(dir.join("val_mask.npy"), &val).unwrap();
    write_npy(dir.join("test_mask.npy"), &test).unwrap();
}

/// two clusters of ten nodes, features leaning towards the cluster label
fn write_planetoid(root: &Path) {
    let dir = root.join("pubmed");
    fs::create_dir_all(&dir).unwrap();
    let n = 20;

    let x = Array2::from_shape_fn((n, 4), |(i, j)| {
        let cluster = i / 10;
        if j / 2 == cluster { 1.0f32 + (i % 3) as f32 } else { (i % 2) as f32 * 0.5 }
    });
    let y = Array1::from_shape_fn(n, |i| (i / 10) as i64);
    let mut src = Vec::new();
    let mut dst = Vec::new();
    for i in 0..n {
        let next = if i % 10 == 9 { i - 9 } else { i + 1 };
        src.push(i as i64);
        dst.push(next as i64);
    }
    src.push(9);
    dst.push(10);
    let e = src.len();
    let edge_index = Array2::from_shape_vec((2, e), src.into_iter().chain(dst).collect()).unwrap();

    write_npy(dir.join("x.npy"), &x).unwrap();
    write_npy(dir.join("y.npy"), &y).unwrap();
    write_npy(dir.join("edge_index.npy"), &edge_index).unwrap();
    write_masks(&dir, n);
}

fn write_tacm12k(root: &Path) {
    let dir = root.join("tacm12k");
    fs::create_dir_all(&dir).unwrap();
    let (n_papers, n_authors) = (12, 5);

    let mut papers = String::from("paper_id,year,conference,title,abstract,label\n");
    for i in 0..n_papers {
        let conference = if i % 2 == 0 { "KDD" } else { "SIGIR" };
        papers.push_str(&format!("{},{},{},title {},\"abstract, {}\",{}\n", i, 2000 + i % 3, conference, i, i, i % 2));
    }
    let mut authors = String::from("author_id,name,firm\n");
    for a in 0..n_authors {
        authors.push_str(&format!("{},author {},firm{}\n", 100 + a, a, a % 2));
    }
    let mut citations = String::from("paper_id,paper_id_cited\n");
    for i in 2..n_papers {
        citations.push_str(&format!("{},{}\n", i, i - 2));
    }
    let mut writings = String::from("paper_id,author_id\n");
    for i in 0..n_papers {
        writings.push_str(&format!("{},{}\n", i, 100 + i % n_authors));
    }

    fs::write(dir.join("papers.csv"), papers).unwrap();
    fs::write(dir.join("authors.csv"), authors).unwrap();
    fs::write(dir.join("citations.csv"), citations).unwrap();
    fs::write(dir.join("writings.csv"), writings).unwrap();

    let paper_embeddings = Array2::from_shape_fn((n_papers, 8), |(i, j)| ((i * 3 + j) % 7) as f32 / 7.0);
    let author_embeddings = Array2::from_shape_fn((n_authors, 8), |(i, j)| ((i + 2 * j) % 5) as f32 / 5.0);
    write_npy(dir.join("paper_embeddings.npy"), &paper_embeddings).unwrap();
    write_npy(dir.join("author_embeddings.npy"), &author_embeddings).unwrap();
    write_masks(&dir, n_papers);
}


#[test]
fn ogc_runs_on_planetoid_layout() {
    let root = tempfile::tempdir().unwrap();
    write_planetoid(root.path());

    let params = OgcParams {
        dataset: PlanetoidName::PubMed,
        data_dir: root.path().to_path_buf(),
        ..OgcParams::default()
    };
    let report = ogc::run(&params).unwrap();

    assert!(report.iterations >= 1 && report.iterations <= 64);
    assert!((0.0..=1.0).contains(&report.test_acc));
    let expected_eta = 0.001 * 0.9f32.powi(report.iterations as i32);
    assert!((report.eta_sup - expected_eta).abs() < 1e-9);
}

#[test]
fn ogc_reports_missing_dataset() {
    let root = tempfile::tempdir().unwrap();
    let params = OgcParams { data_dir: root.path().to_path_buf(), ..OgcParams::default() };
    assert!(ogc::run(&params).is_err());
}

#[test]
fn bridge_runs_on_tacm12k_layout() {
    let root = tempfile::tempdir().unwrap();
    write_tacm12k(root.path());

    let params = BridgeParams {
        tab_dim: 8,
        epochs: 5,
        graph_hidden_dim: 16,
        data_dir: root.path().to_path_buf(),
        ..BridgeParams::default()
    };
    let report = bridge::run(&params).unwrap();

    assert_eq!(report.losses.len(), 5);
    assert!(report.losses.iter().all(|l| l.is_finite()));
    assert!((0.0..=1.0).contains(&report.best.best_test_acc));
}
