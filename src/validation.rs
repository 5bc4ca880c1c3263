//! Local configuration checks that gate the start of a run.
//!
//! Violations are reported, never clamped; nothing here is sent to the backend.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::config::limits::{
    Bounds, CLOUDLETS, HOSTS, ITERATIONS, MAX_WORKLOAD_FILE_BYTES, MIPS, PES_PER_HOST,
    RAM_PER_HOST, VMS,
};
use crate::model::{RunConfiguration, WorkloadFile, WorkloadSource};

/// Field name -> message, ordered for stable display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(pub BTreeMap<String, String>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    fn push(&mut self, field: &str, message: String) {
        self.0.insert(field.to_string(), message);
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.0.values().cloned().collect::<Vec<_>>().join(", ");
        f.write_str(&joined)
    }
}

fn check(errors: &mut ValidationErrors, field: &str, label: &str, value: u64, bounds: Bounds) {
    if !bounds.contains(value) {
        errors.push(
            field,
            format!("{label} must be between {} and {}", bounds.min, bounds.max),
        );
    }
}

fn as_bound(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.ceil() as u64
    } else {
        0
    }
}

pub fn validate_config(config: &RunConfiguration) -> Result<(), ValidationErrors> {
    let dc = &config.data_center;
    let mut errors = ValidationErrors::default();

    check(&mut errors, "numHosts", "Number of hosts", dc.num_hosts.into(), HOSTS);
    check(&mut errors, "numVMs", "Number of VMs", dc.num_vms.into(), VMS);
    check(
        &mut errors,
        "numPesPerHost",
        "PEs per host",
        dc.num_pes_per_host.into(),
        PES_PER_HOST,
    );
    check(&mut errors, "peMips", "PE MIPS", as_bound(dc.pe_mips), MIPS);
    check(&mut errors, "ramPerHost", "RAM per host", dc.ram_per_host, RAM_PER_HOST);
    check(&mut errors, "vmMips", "VM MIPS", as_bound(dc.vm_mips), MIPS);
    check(
        &mut errors,
        "numCloudlets",
        "Number of cloudlets",
        config.num_cloudlets.into(),
        CLOUDLETS,
    );
    check(&mut errors, "iterations", "Iterations", config.iterations.into(), ITERATIONS);

    if dc.vm_ram > dc.ram_per_host {
        errors.push("vmRam", "VM RAM cannot exceed host RAM".into());
    }
    if dc.vm_mips > dc.pe_mips * f64::from(dc.vm_pes) {
        errors.push("vmMips", "VM MIPS cannot exceed total PE capacity".into());
    }

    if let WorkloadSource::Uploaded(file) = &config.workload {
        if let Err(problems) = validate_workload_file(file) {
            errors.push("workloadFile", problems.join(", "));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn validate_workload_file(file: &WorkloadFile) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();
    if file.size_bytes > MAX_WORKLOAD_FILE_BYTES {
        problems.push("File size cannot exceed 500MB".to_string());
    }
    if !file.name.to_ascii_lowercase().ends_with(".csv") {
        problems.push("File must be a CSV file".to_string());
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}
