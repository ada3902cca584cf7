//! Static tag and GeoKey registries.
//!
//! All tables are `'static` slices sorted by id so lookups are binary
//! searches; nothing here is mutable at runtime.

/// Numeric ids for the tags the reader itself consumes.
pub mod tag {
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const PLANAR_CONFIGURATION: u16 = 284;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const SAMPLE_FORMAT: u16 = 339;
    pub const MODEL_PIXEL_SCALE: u16 = 33550;
    pub const MODEL_TIEPOINT: u16 = 33922;
    pub const MODEL_TRANSFORMATION: u16 = 34264;
    pub const GEO_KEY_DIRECTORY: u16 = 34735;
    pub const GEO_DOUBLE_PARAMS: u16 = 34736;
    pub const GEO_ASCII_PARAMS: u16 = 34737;
    pub const GDAL_NODATA: u16 = 42113;
}

/// Well-known tag ids and their names, sorted by id.
pub const TAG_NAMES: &[(u16, &str)] = &[
    (254, "NewSubfileType"),
    (255, "SubfileType"),
    (256, "ImageWidth"),
    (257, "ImageLength"),
    (258, "BitsPerSample"),
    (259, "Compression"),
    (262, "PhotometricInterpretation"),
    (263, "Threshholding"),
    (264, "CellWidth"),
    (265, "CellLength"),
    (266, "FillOrder"),
    (269, "DocumentName"),
    (270, "ImageDescription"),
    (271, "Make"),
    (272, "Model"),
    (273, "StripOffsets"),
    (274, "Orientation"),
    (277, "SamplesPerPixel"),
    (278, "RowsPerStrip"),
    (279, "StripByteCounts"),
    (280, "MinSampleValue"),
    (281, "MaxSampleValue"),
    (282, "XResolution"),
    (283, "YResolution"),
    (284, "PlanarConfiguration"),
    (285, "PageName"),
    (286, "XPosition"),
    (287, "YPosition"),
    (288, "FreeOffsets"),
    (289, "FreeByteCounts"),
    (290, "GrayResponseUnit"),
    (291, "GrayResponseCurve"),
    (292, "T4Options"),
    (293, "T6Options"),
    (296, "ResolutionUnit"),
    (297, "PageNumber"),
    (301, "TransferFunction"),
    (305, "Software"),
    (306, "DateTime"),
    (315, "Artist"),
    (316, "HostComputer"),
    (317, "Predictor"),
    (318, "WhitePoint"),
    (319, "PrimaryChromaticities"),
    (320, "ColorMap"),
    (321, "HalftoneHints"),
    (322, "TileWidth"),
    (323, "TileLength"),
    (324, "TileOffsets"),
    (325, "TileByteCounts"),
    (326, "BadFaxLines"),
    (327, "CleanFaxData"),
    (328, "ConsecutiveBadFaxLines"),
    (330, "SubIFDs"),
    (336, "DotRange"),
    (338, "ExtraSamples"),
    (339, "SampleFormat"),
    (340, "SMinSampleValue"),
    (341, "SMaxSampleValue"),
    (343, "ClipPath"),
    (344, "XClipPathUnits"),
    (345, "YClipPathUnits"),
    (346, "Indexed"),
    (347, "JPEGTables"),
    (433, "Decode"),
    (434, "DefaultImageColor"),
    (529, "YCbCrCoefficients"),
    (530, "YCbCrSubSampling"),
    (531, "YCbCrPositioning"),
    (532, "ReferenceBlackWhite"),
    (559, "StripRowCounts"),
    (700, "XMP"),
    (33432, "Copyright"),
    (33434, "ExposureTime"),
    (33437, "FNumber"),
    (33550, "ModelPixelScale"),
    (33723, "IPTC"),
    (33922, "ModelTiepoint"),
    (34264, "ModelTransformation"),
    (34377, "Photoshop"),
    (34412, "CZ_LSMINFO"),
    (34665, "Exif IFD"),
    (34675, "ICC Profile"),
    (34735, "GeoKeyDirectory"),
    (34736, "GeoDoubleParams"),
    (34737, "GeoAsciiParams"),
    (36864, "ExifVersion"),
    (36867, "DateTimeOriginal"),
    (36868, "DateTimeDigitized"),
    (37377, "ShutterSpeedValue"),
    (37378, "ApertureValue"),
    (37384, "LightSource"),
    (37385, "Flash"),
    (37500, "MakerNote"),
    (37510, "UserComment"),
    (40960, "FlashpixVersion"),
    (40961, "ColorSpace"),
    (41728, "FileSource"),
    (42016, "ImageUniqueID"),
    (42112, "GDAL_METADATA"),
    (42113, "GDAL_NODATA"),
    (50674, "LercParameters"),
];

/// Tags whose values stay arrays even at count 1, sorted by id.
///
/// These are exactly the tags whose consumers index positionally (one
/// element per sample, strip, or tile); unwrapping them would make
/// single-sample and single-strip files a special case everywhere.
const ARRAY_TAGS: &[u16] = &[
    258,   // BitsPerSample
    273,   // StripOffsets
    279,   // StripByteCounts
    324,   // TileOffsets
    325,   // TileByteCounts
    330,   // SubIFDs
    338,   // ExtraSamples
    339,   // SampleFormat
    559,   // StripRowCounts
];

/// GeoKey ids and their names, sorted by id.
pub const GEO_KEY_NAMES: &[(u16, &str)] = &[
    (1024, "GTModelTypeGeoKey"),
    (1025, "GTRasterTypeGeoKey"),
    (1026, "GTCitationGeoKey"),
    (2048, "GeographicTypeGeoKey"),
    (2049, "GeogCitationGeoKey"),
    (2050, "GeogGeodeticDatumGeoKey"),
    (2051, "GeogPrimeMeridianGeoKey"),
    (2052, "GeogLinearUnitsGeoKey"),
    (2053, "GeogLinearUnitSizeGeoKey"),
    (2054, "GeogAngularUnitsGeoKey"),
    (2055, "GeogAngularUnitSizeGeoKey"),
    (2056, "GeogEllipsoidGeoKey"),
    (2057, "GeogSemiMajorAxisGeoKey"),
    (2058, "GeogSemiMinorAxisGeoKey"),
    (2059, "GeogInvFlatteningGeoKey"),
    (2060, "GeogAzimuthUnitsGeoKey"),
    (2061, "GeogPrimeMeridianLongGeoKey"),
    (2062, "GeogTOWGS84GeoKey"),
    (3072, "ProjectedCSTypeGeoKey"),
    (3073, "PCSCitationGeoKey"),
    (3074, "ProjectionGeoKey"),
    (3075, "ProjCoordTransGeoKey"),
    (3076, "ProjLinearUnitsGeoKey"),
    (3077, "ProjLinearUnitSizeGeoKey"),
    (3078, "ProjStdParallel1GeoKey"),
    (3079, "ProjStdParallel2GeoKey"),
    (3080, "ProjNatOriginLongGeoKey"),
    (3081, "ProjNatOriginLatGeoKey"),
    (3082, "ProjFalseEastingGeoKey"),
    (3083, "ProjFalseNorthingGeoKey"),
    (3084, "ProjFalseOriginLongGeoKey"),
    (3085, "ProjFalseOriginLatGeoKey"),
    (3086, "ProjFalseOriginEastingGeoKey"),
    (3087, "ProjFalseOriginNorthingGeoKey"),
    (3088, "ProjCenterLongGeoKey"),
    (3089, "ProjCenterLatGeoKey"),
    (3090, "ProjCenterEastingGeoKey"),
    (3091, "ProjCenterNorthingGeoKey"),
    (3092, "ProjScaleAtNatOriginGeoKey"),
    (3093, "ProjScaleAtCenterGeoKey"),
    (3094, "ProjAzimuthAngleGeoKey"),
    (3095, "ProjStraightVertPoleLongGeoKey"),
    (3096, "ProjRectifiedGridAngleGeoKey"),
    (4096, "VerticalCSTypeGeoKey"),
    (4097, "VerticalCitationGeoKey"),
    (4098, "VerticalDatumGeoKey"),
    (4099, "VerticalUnitsGeoKey"),
];

/// Name of a well-known tag id.
pub fn tag_name(id: u16) -> Option<&'static str> {
    TAG_NAMES
        .binary_search_by_key(&id, |&(tag_id, _)| tag_id)
        .ok()
        .map(|i| TAG_NAMES[i].1)
}

/// Id of a well-known tag name.
pub fn tag_id(name: &str) -> Option<u16> {
    TAG_NAMES
        .iter()
        .find(|&&(_, tag_name)| tag_name == name)
        .map(|&(id, _)| id)
}

/// Whether the tag stays array-shaped even at count 1.
pub fn is_array_tag(id: u16) -> bool {
    ARRAY_TAGS.binary_search(&id).is_ok()
}

/// Name of a well-known GeoKey id.
pub fn geo_key_name(id: u16) -> Option<&'static str> {
    GEO_KEY_NAMES
        .binary_search_by_key(&id, |&(key_id, _)| key_id)
        .ok()
        .map(|i| GEO_KEY_NAMES[i].1)
}
