#![cfg(test)]
// Suppress 'unused' warnings for the testsuite
#![allow(unused)]

mod fault_injection;
mod mesh_scenarios;
mod test_utils;
