// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lib.rs

// <>

pub mod ren;
