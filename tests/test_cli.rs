use std::fs;

use assert_cmd::Command;
use tempfile::tempdir;

const TRAIN: &str = "ID,age,cutaneous_biopsy_breslow,specific_death,months_survival\n\
                     1,50,1.0,True,10\n\
                     2,60,2.0,False,24\n\
                     3,70,3.0,True,36\n\
                     4,45,0.5,False,80\n\
                     5,65,2.5,True,18\n";

#[test]
fn cli_writes_submission() -> Result<(), Box<dyn std::error::Error>> {
    let data = tempdir()?;
    let out = tempdir()?;
    fs::write(data.path().join("train.csv"), TRAIN)?;
    fs::write(
        data.path().join("test.csv"),
        "ID,age,cutaneous_biopsy_breslow\n4,55,1.5\n",
    )?;

    let mut cmd = Command::cargo_bin("cox_submission")?;
    cmd.arg("--data-dir")
        .arg(data.path())
        .arg("--out-dir")
        .arg(out.path())
        .args(["--validation-fraction", "0"]);
    cmd.assert().success();

    let submission = fs::read_to_string(out.path().join("sample-submission-cox.csv"))?;
    let lines: Vec<&str> = submission.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].split(',').count(), 122);
    assert!(lines[1].starts_with("4,"));
    Ok(())
}

#[test]
fn cli_fails_on_missing_train_file() -> Result<(), Box<dyn std::error::Error>> {
    let data = tempdir()?;
    let out = tempdir()?;

    let mut cmd = Command::cargo_bin("cox_submission")?;
    cmd.arg("--data-dir")
        .arg(data.path())
        .arg("--out-dir")
        .arg(out.path());
    cmd.assert().failure();
    assert!(!out.path().join("sample-submission-cox.csv").exists());
    Ok(())
}

#[test]
fn cli_rejects_multi_byte_delimiter() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("cox_submission")?;
    cmd.args(["--delimiter", ";;"]);
    cmd.assert().failure();
    Ok(())
}
