mod common;

use common::synthetic_scene::{arbitrary_cube, library, scratch_dir, wavelengths};
use hypmix::config::{RenderConfig, UnmixConfig};
use hypmix::io::{list_models, load_model_result, save_model_result};
use hypmix::render::save_quicklooks;
use hypmix::{CubeLayout, Error, ImageCube, MixtureModel, Provenance};

fn model() -> MixtureModel {
    let cube = ImageCube::with_layout(arbitrary_cube(3, 4), wavelengths(), CubeLayout::BandsLast)
        .unwrap();
    MixtureModel::new(library(), cube).unwrap()
}

#[test]
fn saved_model_loads_back_unchanged() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = scratch_dir("roundtrip").join("models.parquet");

    let result = model().run(&path, "plain").unwrap();
    save_model_result(&result).unwrap();
    let loaded = load_model_result(&path, "plain").unwrap();

    assert_eq!(loaded, result);
    assert!(loaded.unmixed.is_constrained());
    assert_eq!(loaded.unmixed.fractions().shape(), &[3, 4, 3]);
}

#[test]
fn groups_are_kept_per_model_id_and_replaced_on_resave() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = scratch_dir("groups").join("models.parquet");

    let mut shaded = model();
    shaded.add_virtual_shade().unwrap();
    save_model_result(&shaded.run(&path, "shaded").unwrap()).unwrap();
    save_model_result(&model().run(&path, "plain").unwrap()).unwrap();
    assert_eq!(list_models(&path).unwrap(), vec!["shaded", "plain"]);

    let unconstrained = UnmixConfig { add_to_one: false };
    let replacement = shaded.run_with(&path, "shaded", &unconstrained).unwrap();
    save_model_result(&replacement).unwrap();
    assert_eq!(list_models(&path).unwrap(), vec!["plain", "shaded"]);

    let loaded = load_model_result(&path, "shaded").unwrap();
    assert!(!loaded.unmixed.is_constrained());
    assert_eq!(loaded.unmixed.fracs(), replacement.unmixed.fracs());
    assert_eq!(loaded.endmembers.names().last().map(String::as_str), Some("Shade"));
    // provenance is catalog metadata and is not persisted
    assert!(loaded
        .endmembers
        .endmembers()
        .iter()
        .all(|em| *em.provenance() == Provenance::Unknown));

    let err = load_model_result(&path, "missing").unwrap_err();
    assert!(err.to_string().contains("model 'missing' not found"));
}

#[test]
fn declared_formats_fail_loudly() {
    let dir = scratch_dir("formats");
    for (ext, expected) in [
        ("sma", Error::NotImplemented("sma")),
        ("csv", Error::NotImplemented("csv")),
        ("hdf5", Error::UnsupportedExtension("hdf5".into())),
    ] {
        let path = dir.join(format!("models.{ext}"));
        let result = model().run(&path, "m").unwrap();
        let err = save_model_result(&result).unwrap_err();

        assert_eq!(err.downcast_ref::<Error>(), Some(&expected));
        assert!(!path.exists());
    }
}

#[test]
fn quicklooks_are_written_per_endmember() {
    let dir = scratch_dir("quicklooks");
    let mut shaded = model();
    shaded.add_virtual_shade().unwrap();
    let result = shaded.run(dir.join("models.parquet"), "ql").unwrap();

    let written = save_quicklooks(&result, &dir, &RenderConfig::default()).unwrap();

    assert_eq!(written.len(), result.endmembers.len() + 1);
    assert!(written.iter().all(|p| p.is_file()));
    assert!(written.last().unwrap().ends_with("ql_residual.png"));
    let shade = image::open(&written[3]).unwrap();
    assert_eq!((shade.width(), shade.height()), (4, 3));
}
